//! `latticeflow channels` — list channels the scanner has discovered but
//! nobody has subscribed to yet.

use clap::Args;
use latticeflow_core::paths::DataLayout;
use latticeflow_db::pool::DbConfig;
use latticeflow_db::Store;

#[derive(Args)]
pub struct ChannelsArgs {
    /// Only show channels in this status (new/reviewed/subscribed/ignored).
    #[arg(long)]
    status: Option<String>,
}

pub async fn run(layout: DataLayout, args: ChannelsArgs) -> anyhow::Result<()> {
    let store = Store::open(DbConfig::file(layout.db_path())).await?;
    let status = args.status.map(|s| parse_status(&s)).transpose()?;

    for channel in store.list_discovered_channels(status).await? {
        println!(
            "{}\t{}\treferences={}\tdensity={:.2}\t{:?}",
            channel.id,
            channel.title,
            channel.reference_count,
            channel.design_density(),
            channel.status,
        );
    }
    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<latticeflow_db::models::misc::DiscoveredChannelStatus> {
    use latticeflow_db::models::misc::DiscoveredChannelStatus::*;
    match raw.to_ascii_lowercase().as_str() {
        "new" => Ok(New),
        "reviewed" => Ok(Reviewed),
        "subscribed" => Ok(Subscribed),
        "ignored" => Ok(Ignored),
        other => anyhow::bail!("unknown channel status '{other}'"),
    }
}
