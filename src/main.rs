use anyhow::Result;

fn main() -> Result<()> {
    sine::cli::run()
}
