//! bitcoind JSON-RPC client with timeout, failover and error translation.
//!
//! # Responsibilities
//! - Speak JSON-RPC 1.0 to one or more bitcoind endpoints over HTTP
//! - Bound every call with the configured timeout
//! - Fail over to the next endpoint on transport errors
//! - Translate bitcoind error codes into `SettlementError`
//!
//! `listunspent` only reports addresses the node wallet watches, so issued
//! addresses are imported as `addr()` descriptors. Fresh addresses are
//! imported without a rescan; imported keys rescan from the configured
//! birthday under the longer import timeout.

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Transaction as BitcoinTransaction, Txid};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{LedgerAddress, SettlementError, SettlementResult};
use crate::blockchain::units::UnitConverter;
use crate::blockchain::utxo::node::{
    TxInputInfo, TxOutputInfo, UnspentOutput, UtxoNode, UtxoTxInfo,
};
use crate::config::UtxoLedgerConfig;

/// `RPC_INVALID_ADDRESS_OR_KEY`: unknown transaction or block.
const RPC_NOT_FOUND: i64 = -5;
/// `RPC_VERIFY_ERROR`: generic transaction rejection.
const RPC_VERIFY_ERROR: i64 = -25;
/// `RPC_VERIFY_REJECTED`: policy or consensus rejection.
const RPC_VERIFY_REJECTED: i64 = -26;
/// `RPC_VERIFY_ALREADY_IN_CHAIN`.
const RPC_ALREADY_IN_CHAIN: i64 = -27;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct ListUnspentEntry {
    txid: String,
    vout: u32,
    address: Option<String>,
    amount: serde_json::Number,
    confirmations: u64,
}

#[derive(Deserialize)]
struct ScriptPubKey {
    address: Option<String>,
}

#[derive(Deserialize)]
struct PrevOut {
    value: serde_json::Number,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: ScriptPubKey,
}

#[derive(Deserialize)]
struct RawVin {
    prevout: Option<PrevOut>,
}

#[derive(Deserialize)]
struct RawVout {
    value: serde_json::Number,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: ScriptPubKey,
}

#[derive(Deserialize)]
struct RawTransaction {
    txid: String,
    blockhash: Option<String>,
    blocktime: Option<u64>,
    #[serde(default)]
    vin: Vec<RawVin>,
    #[serde(default)]
    vout: Vec<RawVout>,
    fee: Option<serde_json::Number>,
}

#[derive(Deserialize)]
struct BlockHeader {
    height: u64,
}

#[derive(Deserialize)]
struct DescriptorInfo {
    descriptor: String,
}

#[derive(Deserialize)]
struct ImportResult {
    success: bool,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct SmartFee {
    feerate: Option<serde_json::Number>,
}

/// Convert a JSON BTC amount into satoshi without going through floats.
fn btc_to_sats(value: &serde_json::Number) -> SettlementResult<u64> {
    let text = value.to_string();
    let decimal = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text)
    } else {
        Decimal::from_str(&text)
    }
    .map_err(|e| SettlementError::NetworkUnavailable(format!("bad amount '{}': {}", text, e)))?;

    // Sub-satoshi precision means the response is not an amount we understand.
    let sats = UnitConverter::BITCOIN
        .to_subunits(decimal)
        .map_err(|e| SettlementError::NetworkUnavailable(format!("bad amount '{}': {}", text, e)))?;
    u64::try_from(sats)
        .map_err(|_| SettlementError::NetworkUnavailable(format!("amount '{}' out of range", text)))
}

/// BTC/kvB → sat/vB, rounded up.
fn btc_per_kvb_to_sat_per_vb(value: &serde_json::Number) -> SettlementResult<u64> {
    let sat_per_kvb = btc_to_sats(value)?;
    Ok(sat_per_kvb.div_ceil(1_000))
}

/// `importdescriptors` timestamp and call timeout for a watch request.
///
/// Without a rescan the import is instant; with one the node blocks until
/// every block since the timestamp has been scanned.
fn import_timestamp(
    rescan_from: Option<u64>,
    normal: Duration,
    import: Duration,
) -> (Value, Duration) {
    match rescan_from {
        None => (json!("now"), normal),
        Some(birthday) => (json!(birthday), import),
    }
}

/// Translate a bitcoind error object.
fn translate_error(method: &str, body: RpcErrorBody) -> SettlementError {
    match body.code {
        RPC_NOT_FOUND => SettlementError::TransactionNotFound(body.message),
        RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED => SettlementError::BroadcastRejected(body.message),
        code => SettlementError::NetworkUnavailable(format!(
            "{} failed with code {}: {}",
            method, code, body.message
        )),
    }
}

/// JSON-RPC client for bitcoind.
pub struct BitcoindRpc {
    http: reqwest::Client,
    endpoints: Vec<url::Url>,
    user: Option<String>,
    password: Option<String>,
    timeout_duration: Duration,
    import_timeout: Duration,
    next_id: AtomicU64,
}

impl BitcoindRpc {
    /// Create a client from configuration. Does not contact the node.
    pub fn new(config: &UtxoLedgerConfig) -> SettlementResult<Self> {
        let primary = url::Url::parse(&config.rpc_url).map_err(|e| {
            SettlementError::Config(format!("invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        let mut endpoints = vec![primary];
        for candidate in &config.failover_urls {
            match url::Url::parse(candidate) {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %candidate, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SettlementError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            endpoints,
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
            timeout_duration: Duration::from_secs(config.rpc_timeout_secs),
            import_timeout: Duration::from_secs(config.import_timeout_secs),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call_endpoint(
        &self,
        endpoint: &url::Url,
        method: &str,
        params: &Value,
    ) -> Result<RpcResponse, String> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: params.clone(),
        };

        let mut builder = self.http.post(endpoint.clone()).json(&request);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        // bitcoind reports RPC errors with HTTP 404/500 and a JSON body.
        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| format!("HTTP {}: {}", status, e))
    }

    /// Send `method` to each endpoint in order until one answers.
    ///
    /// The outer error means no endpoint answered; the inner one is the
    /// node's own error object.
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> SettlementResult<Result<Value, RpcErrorBody>> {
        self.request_with_timeout(method, params, self.timeout_duration)
            .await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> SettlementResult<Result<Value, RpcErrorBody>> {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            match timeout(limit, self.call_endpoint(endpoint, method, &params)).await {
                Ok(Ok(RpcResponse {
                    error: Some(body), ..
                })) => return Ok(Err(body)),
                Ok(Ok(RpcResponse { result, .. })) => return Ok(Ok(result.unwrap_or(Value::Null))),
                Ok(Err(e)) => {
                    tracing::warn!(endpoint_idx = i, method = method, error = %e, "RPC error, trying next endpoint");
                }
                Err(_) => {
                    tracing::warn!(endpoint_idx = i, method = method, "RPC timeout, trying next endpoint");
                }
            }
        }
        Err(SettlementError::NetworkUnavailable(format!(
            "all bitcoind endpoints failed for {}",
            method
        )))
    }

    /// Call `method` and decode its result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> SettlementResult<T> {
        self.call_with_timeout(method, params, self.timeout_duration)
            .await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> SettlementResult<T> {
        let result = self
            .request_with_timeout(method, params, limit)
            .await?
            .map_err(|body| translate_error(method, body))?;
        serde_json::from_value(result).map_err(|e| {
            SettlementError::NetworkUnavailable(format!("unexpected {} response: {}", method, e))
        })
    }
}

#[async_trait]
impl UtxoNode for BitcoindRpc {
    async fn list_unspent(
        &self,
        address: &LedgerAddress,
        min_confirmations: u64,
    ) -> SettlementResult<Vec<UnspentOutput>> {
        let entries: Vec<ListUnspentEntry> = self
            .call(
                "listunspent",
                json!([min_confirmations, 9_999_999, [address.as_str()]]),
            )
            .await?;

        entries
            .into_iter()
            .map(|entry| {
                let txid = Txid::from_str(&entry.txid).map_err(|e| {
                    SettlementError::NetworkUnavailable(format!("bad txid '{}': {}", entry.txid, e))
                })?;
                Ok(UnspentOutput {
                    outpoint: bitcoin::OutPoint::new(txid, entry.vout),
                    address: entry
                        .address
                        .map(LedgerAddress::from)
                        .unwrap_or_else(|| address.clone()),
                    amount: btc_to_sats(&entry.amount)?,
                    confirmations: entry.confirmations,
                })
            })
            .collect()
    }

    async fn tip_height(&self) -> SettlementResult<u64> {
        self.call("getblockcount", json!([])).await
    }

    async fn transaction(&self, txid: &Txid) -> SettlementResult<Option<UtxoTxInfo>> {
        let raw: RawTransaction = match self
            .call("getrawtransaction", json!([txid.to_string(), 2]))
            .await
        {
            Ok(raw) => raw,
            Err(SettlementError::TransactionNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let block_height = match &raw.blockhash {
            Some(hash) => {
                let header: BlockHeader = self.call("getblockheader", json!([hash])).await?;
                Some(header.height)
            }
            None => None,
        };

        let inputs = raw
            .vin
            .iter()
            .map(|vin| match &vin.prevout {
                Some(prev) => Ok(TxInputInfo {
                    address: prev.script_pubkey.address.clone(),
                    amount: Some(btc_to_sats(&prev.value)?),
                }),
                None => Ok(TxInputInfo::default()),
            })
            .collect::<SettlementResult<Vec<_>>>()?;

        let outputs = raw
            .vout
            .iter()
            .map(|vout| {
                Ok(TxOutputInfo {
                    address: vout.script_pubkey.address.clone(),
                    amount: btc_to_sats(&vout.value)?,
                })
            })
            .collect::<SettlementResult<Vec<_>>>()?;

        let fee = raw.fee.as_ref().map(btc_to_sats).transpose()?;
        let reported = Txid::from_str(&raw.txid).unwrap_or(*txid);

        Ok(Some(UtxoTxInfo {
            txid: reported,
            block_hash: raw.blockhash,
            block_height,
            block_time: raw.blocktime,
            inputs,
            outputs,
            fee,
        }))
    }

    async fn fee_rate(&self, conf_target: u16) -> SettlementResult<Option<u64>> {
        let estimate: SmartFee = self.call("estimatesmartfee", json!([conf_target])).await?;
        estimate
            .feerate
            .as_ref()
            .map(btc_per_kvb_to_sat_per_vb)
            .transpose()
    }

    async fn broadcast(&self, tx: &BitcoinTransaction) -> SettlementResult<Txid> {
        let txid = tx.compute_txid();
        match self
            .request("sendrawtransaction", json!([serialize_hex(tx)]))
            .await?
        {
            Ok(reported) => Ok(reported
                .as_str()
                .and_then(|id| Txid::from_str(id).ok())
                .unwrap_or(txid)),
            Err(body) if body.code == RPC_ALREADY_IN_CHAIN => {
                tracing::debug!(txid = %txid, "Transaction already in chain");
                Ok(txid)
            }
            Err(body) => Err(translate_error("sendrawtransaction", body)),
        }
    }

    async fn watch_address(
        &self,
        address: &LedgerAddress,
        rescan_from: Option<u64>,
    ) -> SettlementResult<()> {
        let info: DescriptorInfo = self
            .call("getdescriptorinfo", json!([format!("addr({})", address)]))
            .await?;
        let (timestamp, limit) =
            import_timestamp(rescan_from, self.timeout_duration, self.import_timeout);
        if rescan_from.is_some() {
            tracing::info!(
                address = %address,
                timestamp = %timestamp,
                timeout_secs = limit.as_secs(),
                "Importing address with rescan"
            );
        }
        let results: Vec<ImportResult> = self
            .call_with_timeout(
                "importdescriptors",
                json!([[{ "desc": info.descriptor, "timestamp": timestamp }]]),
                limit,
            )
            .await?;

        match results.into_iter().find(|r| !r.success) {
            Some(failed) => Err(SettlementError::NetworkUnavailable(format!(
                "importdescriptors failed for {}: {}",
                address,
                failed.error.map(|e| e.message).unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BitcoindRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoindRpc")
            .field("endpoints", &self.endpoints.len())
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}
