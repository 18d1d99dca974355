fn main() {
    std::process::exit(rsandbox::cli::run());
}
