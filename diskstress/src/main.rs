use anyhow::Result;

fn main() -> Result<()> {
    diskstress::cli::execute()
}
