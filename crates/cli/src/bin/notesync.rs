use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    notesync_cli::main_entry().await
}
