fn main() -> Result<(), Box<dyn std::error::Error>> {
    llamaman::cli::main()
}
