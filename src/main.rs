fn main() {
    if let Err(err) = colcopy::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
