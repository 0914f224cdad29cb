use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    pagesync::cli::app::run().await
}
