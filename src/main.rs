use std::process;

fn main() {
    if let Err(err) = streamgate::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
