/// Entry point for the Mosalama agent.
///
/// Configuration is read from `MOSALAMA_*` environment variables, log filtering from
/// `RUST_LOG`.
///
/// # Examples
///
/// ```bash
/// MOSALAMA_MODEL_URL=https://models.example.com/llama.gguf RUST_LOG=debug cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), mosalama_agent::error::Error> {
    mosalama_agent::run().await
}
