//! Print the platforms of every manifest list in a registry.
//!
//! Run with: cargo run -p registry --example list_platforms -- registry.example.com

use registry::{DockerConfig, RegistryClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let domain = std::env::args()
        .nth(1)
        .ok_or("usage: list_platforms <domain>")?;

    let client = RegistryClient::builder(domain)
        .credentials_from(&DockerConfig::from_env()?)?
        .build()?;

    for repository in client.catalog().await? {
        for tag in client.tags(&repository).await? {
            let entries = client.manifest_list(&repository, &tag).await?;
            if entries.is_empty() {
                continue;
            }

            println!("{repository}:{tag}");
            for entry in entries {
                let platform = entry
                    .platform
                    .map(|platform| platform.to_string())
                    .unwrap_or_else(|| "unknown".into());
                println!("  {platform} {}", entry.digest);
            }
        }
    }

    Ok(())
}
