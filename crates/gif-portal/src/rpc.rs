//! solana json-rpc runtime
//!
//! reads accounts with `getAccountInfo` (base64 data) and submits calls with
//! `getLatestBlockhash` + `sendTransaction`. the endpoint and commitment come
//! from the calling context of each call.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::keys::Pubkey;
use crate::runtime::{sign_call, CallingContext, ProgramCall, ProgramRuntime};
use crate::{PortalError, Result};

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct AccountInfo {
    /// [payload, encoding]
    data: (String, String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
}

pub struct RpcRuntime {
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for RpcRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRuntime {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, endpoint: &str, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!("rpc {} -> {}", method, endpoint);

        let resp = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: RpcResponse<T> = resp.json().await?;

        if let Some(err) = body.error {
            return Err(PortalError::Rpc { code: err.code, message: err.message });
        }
        body.result
            .ok_or_else(|| PortalError::Decoding(format!("{} response without result", method)))
    }

    async fn latest_blockhash(&self, ctx: &CallingContext) -> Result<[u8; 32]> {
        let resp: WithContext<LatestBlockhash> = self
            .call(
                &ctx.endpoint,
                "getLatestBlockhash",
                json!([{ "commitment": ctx.commitment.as_str() }]),
            )
            .await?;
        let bytes = bs58::decode(&resp.value.blockhash)
            .into_vec()
            .map_err(|e| PortalError::Decoding(format!("blockhash: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| PortalError::Decoding("blockhash is not 32 bytes".into()))
    }
}

#[async_trait]
impl ProgramRuntime for RpcRuntime {
    async fn fetch_account(&self, ctx: &CallingContext, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let resp: WithContext<Option<AccountInfo>> = self
            .call(
                &ctx.endpoint,
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": ctx.commitment.as_str() }
                ]),
            )
            .await?;

        let Some(info) = resp.value else {
            return Ok(None);
        };
        let (payload, encoding) = info.data;
        if encoding != "base64" {
            return Err(PortalError::Decoding(format!("unexpected encoding {}", encoding)));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| PortalError::Decoding(e.to_string()))?;
        Ok(Some(data))
    }

    async fn execute(&self, ctx: &CallingContext, call: ProgramCall) -> Result<String> {
        let blockhash = self.latest_blockhash(ctx).await?;
        let tx = sign_call(ctx, &call, blockhash).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(tx.serialize());

        self.call(
            &ctx.endpoint,
            "sendTransaction",
            json!([
                encoded,
                { "encoding": "base64", "preflightCommitment": ctx.commitment.as_str() }
            ]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::Commitment;
    use crate::keys::Keypair;
    use crate::program::{BaseAccount, BoardInstruction};
    use crate::transaction::Transaction;
    use crate::wallet::{ConnectOptions, KeypairWallet, WalletProvider};

    async fn context(endpoint: &str) -> (CallingContext, Pubkey) {
        let wallet = KeypairWallet::new(Keypair::from_secret(&[4; 32]));
        let payer = wallet.connect(ConnectOptions::interactive()).await.unwrap();
        let ctx = CallingContext {
            endpoint: endpoint.to_string(),
            commitment: Commitment::Processed,
            payer,
            wallet: Arc::new(wallet),
        };
        (ctx, payer)
    }

    #[tokio::test]
    async fn test_fetch_missing_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getAccountInfo" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": { "context": { "slot": 10 }, "value": null }
            })))
            .mount(&server)
            .await;

        let (ctx, _) = context(&server.uri()).await;
        let rt = RpcRuntime::new();
        assert_eq!(rt.fetch_account(&ctx, &Pubkey::new([9; 32])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_account_data() {
        let account = BaseAccount::default().encode();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "getAccountInfo",
                "params": [Pubkey::new([9; 32]).to_string(), { "encoding": "base64", "commitment": "processed" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {
                    "context": { "slot": 10 },
                    "value": {
                        "data": [base64::engine::general_purpose::STANDARD.encode(&account), "base64"],
                        "executable": false,
                        "lamports": 1_000_000,
                        "owner": "11111111111111111111111111111111",
                        "rentEpoch": 0
                    }
                }
            })))
            .mount(&server)
            .await;

        let (ctx, _) = context(&server.uri()).await;
        let data = RpcRuntime::new().fetch_account(&ctx, &Pubkey::new([9; 32])).await.unwrap();
        assert_eq!(data, Some(account));
    }

    #[tokio::test]
    async fn test_rpc_error_and_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32005, "message": "node is behind" }
            })))
            .mount(&server)
            .await;

        let (ctx, _) = context(&server.uri()).await;
        let err = RpcRuntime::new().fetch_account(&ctx, &Pubkey::new([9; 32])).await.unwrap_err();
        assert!(matches!(err, PortalError::Rpc { code: -32005, .. }));
        assert!(err.is_transient());

        let down = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        let (ctx, _) = context(&down.uri()).await;
        let err = RpcRuntime::new().fetch_account(&ctx, &Pubkey::new([9; 32])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_execute_sends_signed_transaction() {
        let server = MockServer::start().await;
        let blockhash = [8u8; 32];
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getLatestBlockhash" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {
                    "context": { "slot": 10 },
                    "value": { "blockhash": bs58::encode(blockhash).into_string(), "lastValidBlockHeight": 300 }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "sendTransaction" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2, "result": "5sig"
            })))
            .mount(&server)
            .await;

        let (ctx, payer) = context(&server.uri()).await;
        let board = Arc::new(Keypair::from_secret(&[5; 32]));
        let instruction = BoardInstruction::StartStuffOff;
        let call = ProgramCall {
            program_id: Pubkey::new([7; 32]),
            accounts: instruction.accounts(board.pubkey(), payer),
            instruction,
            signers: vec![board.clone()],
        };

        let sig = RpcRuntime::new().execute(&ctx, call).await.unwrap();
        assert_eq!(sig, "5sig");

        // inspect what went over the wire
        let requests = server.received_requests().await.unwrap();
        let sent: Value = requests
            .iter()
            .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
            .find(|v| v["method"] == "sendTransaction")
            .unwrap();
        assert_eq!(sent["params"][1]["preflightCommitment"], "processed");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(sent["params"][0].as_str().unwrap())
            .unwrap();
        let tx = Transaction::deserialize(&raw).unwrap();
        assert_eq!(tx.message.recent_blockhash, blockhash);
        assert_eq!(tx.message.signers(), &[payer, board.pubkey()]);
        assert!(tx.is_fully_signed());
    }
}
