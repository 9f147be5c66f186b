use anyhow::{bail, Context, Result};
use clap::Args;
use geonl_lib::{
    AggregateRequest, Aggregator, AggregatorConfig, CancellationToken, Outcome, SourceParams,
    SourceQuery, ToolIntent,
};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Address, place name, postal code or parcel designation.
    pub query: String,
    /// Restrict results to one type (adres, perceel, postcode, gemeente, woonplaats, ...).
    #[arg(long = "type")]
    pub kind: Option<String>,
    /// Maximum number of results.
    #[arg(long)]
    pub limit: Option<u32>,
}

pub fn run(args: &SearchArgs) -> Result<()> {
    super::mcp::configure_tracing(None)?;

    let config = AggregatorConfig::from_env().context("invalid GEONL_* configuration")?;
    let request = AggregateRequest::new(ToolIntent::SearchLocation, SourceQuery::text(&args.query))
        .with_params(SourceParams {
            location_type: args.kind.clone(),
            limit: args.limit,
            ..Default::default()
        });

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(async {
        let aggregator = Aggregator::new(config).context("failed to build aggregator")?;
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
        aggregator
            .aggregate(&request, &cancel)
            .await
            .context("search failed")
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.outcome == Outcome::Failed {
        bail!("location search failed; see sources for details");
    }
    Ok(())
}
