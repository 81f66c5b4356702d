use anyhow::Context;

fn main() -> anyhow::Result<()> {
    syndic::run().context("syndic command failed")?;
    Ok(())
}
