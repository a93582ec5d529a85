use anyhow::Context;
use serde_json::Value;
use tidepool_rpc::JsonRpcClient;

pub async fn run(url: &str, user: &str, password: &str, object: &str, method: &str, params: &str) -> anyhow::Result<()> {
    let params: Value = serde_json::from_str(params).context("parsing --params")?;
    let client = JsonRpcClient::http(url, user, password)?;
    let result = client.request(object, method).call(params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
