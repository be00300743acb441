fn main() {
    mountdeck_lib::run()
}
