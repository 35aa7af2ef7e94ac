fn main() {
    bracket_forge_lib::run()
}
