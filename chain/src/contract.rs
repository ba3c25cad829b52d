//! [`AccessContract`] over Ethereum JSON-RPC.
//!
//! Reads go through `eth_call`. The oracle request goes through
//! `eth_sendTransaction`, so the endpoint must be the wallet (or a node with
//! the sender unlocked): this process never holds a private key.

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use timetoken_types::{AccessLevel, Subject, TxRef};
use tracing::{debug, info, warn};

use crate::abi;
use crate::error::ChainError;
use crate::receipt::{LogEntry, TxReceipt};
use crate::rpc::{decode_hex, decode_quantity, JsonRpcClient};
use crate::{AccessContract, OracleRequestParams};

/// Settings for [`RpcAccessContract`].
#[derive(Clone, Debug)]
pub struct RpcContractConfig {
    /// Deployed access contract.
    pub contract: Subject,
    /// Account that signs `requestVerification`; the subject itself when `None`.
    pub sender: Option<Subject>,
    /// Upper bound on waiting for the first confirmation.
    pub confirmation_timeout: Duration,
    /// Delay between `eth_getTransactionReceipt` polls.
    pub receipt_poll_interval: Duration,
}

pub struct RpcAccessContract {
    rpc: JsonRpcClient,
    config: RpcContractConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

impl RpcAccessContract {
    pub fn new(rpc: JsonRpcClient, config: RpcContractConfig) -> Self {
        Self { rpc, config }
    }

    async fn eth_call(&self, data: Vec<u8>, what: &str) -> Result<Vec<u8>, ChainError> {
        let result = self
            .rpc
            .call(
                "eth_call",
                json!([
                    {
                        "to": self.config.contract.as_str(),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    "latest"
                ]),
            )
            .await?;
        let bytes = decode_hex(&result, what)?;
        if bytes.is_empty() {
            // eth_call against an address without code returns 0x.
            return Err(ChainError::NoContract(self.config.contract.to_string()));
        }
        Ok(bytes)
    }

    /// Poll for the receipt of a broadcast transaction until it is included or
    /// `confirmation_timeout` passes.
    ///
    /// Once the hash exists the request may land at any moment, so read errors
    /// are retried here rather than returned: every failure this yields names
    /// the transaction.
    async fn wait_for_receipt(&self, tx: TxRef) -> Result<TxReceipt, ChainError> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout;
        loop {
            match self.poll_receipt(tx).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => warn!(%tx, error = %e, "receipt poll failed, retrying"),
            }
            if tokio::time::Instant::now() + self.config.receipt_poll_interval > deadline {
                return Err(self.classify_missing(tx).await);
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn poll_receipt(&self, tx: TxRef) -> Result<Option<TxReceipt>, ChainError> {
        let value = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx.to_string()]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let receipt = parse_receipt(value)?;
        Ok((receipt.block_number > 0).then_some(receipt))
    }

    /// A receipt never showed up: tell a dropped transaction from a slow one.
    async fn classify_missing(&self, tx: TxRef) -> ChainError {
        match self
            .rpc
            .call("eth_getTransactionByHash", json!([tx.to_string()]))
            .await
        {
            Ok(Value::Null) => ChainError::Dropped(tx.to_string()),
            _ => ChainError::ConfirmationTimeout {
                tx: tx.to_string(),
                waited_secs: self.config.confirmation_timeout.as_secs(),
            },
        }
    }
}

#[async_trait]
impl AccessContract for RpcAccessContract {
    fn address(&self) -> &Subject {
        &self.config.contract
    }

    async fn has_access(&self, subject: &Subject) -> Result<bool, ChainError> {
        let data = self
            .eth_call(abi::encode_has_access(subject), "hasAccess")
            .await?;
        abi::decode_has_access(&data)
    }

    async fn level(&self, subject: &Subject) -> Result<AccessLevel, ChainError> {
        let data = self.eth_call(abi::encode_level(subject), "level").await?;
        abi::decode_level(&data)
    }

    async fn request_verification(
        &self,
        subject: &Subject,
        params: &OracleRequestParams,
    ) -> Result<TxReceipt, ChainError> {
        let from = self.config.sender.as_ref().unwrap_or(subject);
        let data = abi::encode_request_verification(subject, params);
        let result = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": from.as_str(),
                    "to": self.config.contract.as_str(),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;

        let tx_str = result
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse("eth_sendTransaction: expected hash".into()))?;
        let tx = TxRef::parse(tx_str).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        info!(%subject, %tx, "verification request sent, awaiting inclusion");

        let receipt = self.wait_for_receipt(tx).await?;
        if !receipt.success {
            warn!(%subject, %tx, block = receipt.block_number, "verification request reverted");
            return Err(ChainError::Reverted(tx.to_string()));
        }
        debug!(%tx, block = receipt.block_number, logs = receipt.logs.len(), "receipt received");
        Ok(receipt)
    }
}

fn parse_receipt(value: Value) -> Result<TxReceipt, ChainError> {
    let raw: RawReceipt = serde_json::from_value(value)
        .map_err(|e| ChainError::InvalidResponse(format!("receipt: {e}")))?;

    let tx = TxRef::parse(&raw.transaction_hash)
        .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
    let block_number = match raw.block_number {
        Some(n) => decode_quantity(&Value::String(n), "blockNumber")?,
        None => 0,
    };
    let success = match raw.status.as_deref() {
        Some(s) => decode_quantity(&Value::String(s.to_string()), "status")? == 1,
        // Pre-Byzantium receipts carry no status; treat inclusion as success.
        None => true,
    };

    let logs = raw
        .logs
        .into_iter()
        .map(|log| {
            let address = Subject::parse(&log.address)
                .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
            let topics = log
                .topics
                .iter()
                .map(|t| {
                    B256::from_str(t)
                        .map_err(|e| ChainError::InvalidResponse(format!("topic {t}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let data = decode_hex(&Value::String(log.data), "log data")?;
            Ok(LogEntry {
                address,
                topics,
                data,
            })
        })
        .collect::<Result<Vec<_>, ChainError>>()?;

    Ok(TxReceipt {
        tx,
        block_number,
        success,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

    const CONTRACT: &str = "0x1111111111111111111111111111111111111111";
    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn tx_hash() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    fn params() -> OracleRequestParams {
        OracleRequestParams {
            secrets_slot: 0,
            secrets_version: 1,
            subscription_id: 7,
        }
    }

    fn rpc(name: &str) -> MockBuilder {
        Mock::given(method("POST")).and(body_partial_json(json!({ "method": name })))
    }

    fn result(value: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": value }))
    }

    fn word(n: u64) -> Value {
        json!(format!("0x{n:064x}"))
    }

    fn included(status: &str) -> Value {
        json!({
            "transactionHash": tx_hash(),
            "blockNumber": "0x5",
            "status": status,
            "logs": [],
        })
    }

    fn contract(server: &MockServer) -> RpcAccessContract {
        RpcAccessContract::new(
            JsonRpcClient::new(server.uri()).unwrap(),
            RpcContractConfig {
                contract: Subject::parse(CONTRACT).unwrap(),
                sender: None,
                confirmation_timeout: Duration::from_millis(300),
                receipt_poll_interval: Duration::from_millis(20),
            },
        )
    }

    async fn broadcast_ok(server: &MockServer) {
        rpc("eth_sendTransaction")
            .respond_with(result(json!(tx_hash())))
            .expect(1)
            .mount(server)
            .await;
    }

    fn alice() -> Subject {
        Subject::parse(ALICE).unwrap()
    }

    #[tokio::test]
    async fn reads_decode_eth_call_results() {
        let server = MockServer::start().await;
        rpc("eth_call")
            .and(body_partial_json(json!({
                "params": [{ "data": format!("0x{}", hex::encode(abi::encode_has_access(&alice()))) }]
            })))
            .respond_with(result(word(1)))
            .mount(&server)
            .await;
        rpc("eth_call")
            .respond_with(result(word(3)))
            .mount(&server)
            .await;

        let contract = contract(&server);
        assert!(contract.has_access(&alice()).await.unwrap());
        assert_eq!(contract.level(&alice()).await.unwrap(), AccessLevel::new(3));
    }

    #[tokio::test]
    async fn empty_call_result_means_no_contract() {
        let server = MockServer::start().await;
        rpc("eth_call").respond_with(result(json!("0x"))).mount(&server).await;

        let err = contract(&server).has_access(&alice()).await.unwrap_err();
        assert!(matches!(err, ChainError::NoContract(_)));
    }

    #[tokio::test]
    async fn receipt_poll_retries_until_included() {
        let server = MockServer::start().await;
        broadcast_ok(&server).await;
        rpc("eth_getTransactionReceipt")
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(Value::Null))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(included("0x1")))
            .mount(&server)
            .await;

        let receipt = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap();
        assert_eq!(receipt.tx, TxRef::parse(&tx_hash()).unwrap());
        assert_eq!(receipt.block_number, 5);
        assert!(receipt.success);
    }

    #[tokio::test]
    async fn failing_receipt_reads_end_in_confirmation_timeout_with_tx() {
        let server = MockServer::start().await;
        broadcast_ok(&server).await;
        rpc("eth_getTransactionReceipt")
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        rpc("eth_getTransactionByHash")
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap_err();
        match err {
            ChainError::ConfirmationTimeout { tx, .. } => assert_eq!(tx, tx_hash()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_transaction_is_dropped() {
        let server = MockServer::start().await;
        broadcast_ok(&server).await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(Value::Null))
            .mount(&server)
            .await;
        rpc("eth_getTransactionByHash")
            .respond_with(result(Value::Null))
            .mount(&server)
            .await;

        let err = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Dropped(tx) if tx == tx_hash()));
    }

    #[tokio::test]
    async fn known_but_unmined_transaction_times_out() {
        let server = MockServer::start().await;
        broadcast_ok(&server).await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(Value::Null))
            .mount(&server)
            .await;
        rpc("eth_getTransactionByHash")
            .respond_with(result(json!({ "hash": tx_hash(), "blockNumber": null })))
            .mount(&server)
            .await;

        let err = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ConfirmationTimeout { .. }));
    }

    #[tokio::test]
    async fn reverted_receipt_is_reported() {
        let server = MockServer::start().await;
        broadcast_ok(&server).await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(included("0x0")))
            .mount(&server)
            .await;

        let err = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Reverted(tx) if tx == tx_hash()));
    }

    #[tokio::test]
    async fn wallet_rejection_sends_no_receipt_polls() {
        let server = MockServer::start().await;
        rpc("eth_sendTransaction")
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": 4001, "message": "User rejected the request." },
            })))
            .mount(&server)
            .await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(Value::Null))
            .expect(0)
            .mount(&server)
            .await;

        let err = contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::WalletRejected(_)));
    }

    #[tokio::test]
    async fn sender_defaults_to_subject() {
        let server = MockServer::start().await;
        rpc("eth_sendTransaction")
            .and(body_partial_json(json!({ "params": [{ "from": ALICE, "to": CONTRACT }] })))
            .respond_with(result(json!(tx_hash())))
            .expect(1)
            .mount(&server)
            .await;
        rpc("eth_getTransactionReceipt")
            .respond_with(result(included("0x1")))
            .mount(&server)
            .await;

        contract(&server)
            .request_verification(&alice(), &params())
            .await
            .unwrap();
    }

    #[test]
    fn parses_successful_receipt() {
        let tx = format!("0x{}", "ab".repeat(32));
        let topic = format!("0x{}", "00".repeat(32));
        let value = json!({
            "transactionHash": tx,
            "blockNumber": "0x10",
            "status": "0x1",
            "logs": [{ "address": CONTRACT, "topics": [topic], "data": "0x" }],
        });
        let receipt = parse_receipt(value).unwrap();
        assert_eq!(receipt.block_number, 16);
        assert!(receipt.success);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].address, Subject::parse(CONTRACT).unwrap());
        assert!(receipt.logs[0].data.is_empty());
    }

    #[test]
    fn parses_reverted_receipt() {
        let value = json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "blockNumber": "0x2",
            "status": "0x0",
        });
        let receipt = parse_receipt(value).unwrap();
        assert!(!receipt.success);
        assert!(receipt.logs.is_empty());
    }

    #[test]
    fn rejects_bad_topic() {
        let value = json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "blockNumber": "0x2",
            "status": "0x1",
            "logs": [{ "address": CONTRACT, "topics": ["0x12"], "data": "0x" }],
        });
        assert!(matches!(
            parse_receipt(value),
            Err(ChainError::InvalidResponse(_))
        ));
    }
}
