use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time;

use super::{
    abi::{self, Token},
    Address, ChainError, Event, Ledger, Post, Profile, Receipt, Write,
};

/// Ledger client speaking Ethereum JSON-RPC to a wallet endpoint.
///
/// Signing happens inside the wallet; this client only asks it to send
/// transactions on behalf of the connected account.
pub struct RpcLedger {
    http: Client,
    url: String,
    contract: Address,
    account: Option<Address>,
    poll: Duration,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RpcResponse {
    Err { error: RpcErrorBody },
    Ok { result: Value },
}
#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
}
#[derive(Deserialize)]
struct RawLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()
}

fn quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

impl RpcErrorBody {
    /// Revert payload, either inline or nested one level as some wallets do.
    fn revert_data(&self) -> Option<Vec<u8>> {
        let data = self.data.as_ref()?;
        data.as_str()
            .or_else(|| data.get("data").and_then(Value::as_str))
            .and_then(from_hex)
    }

    fn into_error(self) -> ChainError {
        let data = self.revert_data();
        ChainError::from_rpc(self.code, self.message, data.as_deref())
    }
}

impl RawReceipt {
    fn into_receipt(self, tx_hash: String, contract: &Address) -> Result<Receipt, ChainError> {
        if self.status.as_deref().and_then(quantity) == Some(0) {
            return Err(ChainError::Reverted(format!(
                "transaction {tx_hash} failed on-chain"
            )));
        }

        let events = self
            .logs
            .iter()
            .filter(|l| l.address.parse::<Address>().ok().as_ref() == Some(contract))
            .filter_map(|l| l.topics.first())
            .filter_map(|t| from_hex(t))
            .filter_map(|t| Event::from_topic(&t))
            .collect();

        Ok(Receipt {
            tx_hash,
            block_number: self.block_number.as_deref().and_then(quantity),
            events,
        })
    }
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, contract: Address, poll: Duration) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            contract,
            account: None,
            poll,
            next_id: AtomicU64::new(1),
        }
    }

    /// Sets the account transactions are sent from.
    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("rpc #{id} {method}");

        let res = self
            .http
            .post(&self.url)
            .json(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .send()
            .await
            .map_err(ChainError::Http)?
            .text()
            .await
            .map_err(ChainError::Http)?;

        match serde_json::from_str(&res).map_err(ChainError::Scheme)? {
            RpcResponse::Ok { result } => Ok(result),
            RpcResponse::Err { error } => Err(error.into_error()),
        }
    }

    /// Asks the wallet to expose its accounts.
    pub async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        let accounts: Vec<String> =
            serde_json::from_value(self.request("eth_requestAccounts", json!([])).await?)
                .map_err(ChainError::Scheme)?;

        accounts
            .iter()
            .map(|a| {
                a.parse()
                    .map_err(|_| ChainError::Malformed("account is not an address"))
            })
            .collect()
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.request("eth_chainId", json!([]))
            .await?
            .as_str()
            .and_then(quantity)
            .ok_or(ChainError::Malformed("chain id is not a quantity"))
    }

    async fn call(&self, signature: &str, tokens: &[Token]) -> Result<Vec<u8>, ChainError> {
        let data = to_hex(&abi::encode_call(signature, tokens));
        let params = json!([{ "to": self.contract.to_string(), "data": data }, "latest"]);

        let out = self
            .request("eth_call", params)
            .await?
            .as_str()
            .and_then(from_hex)
            .ok_or(ChainError::Malformed("eth_call result is not hex"))?;

        if out.is_empty() {
            return Err(ChainError::Reverted(format!("{signature} returned no data")));
        }
        Ok(out)
    }

    /// Runs a view call, mapping a revert to `None`.
    async fn view(&self, signature: &str, tokens: &[Token]) -> Result<Option<Vec<u8>>, ChainError> {
        match self.call(signature, tokens).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => {
                debug!("{signature}: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: String) -> Result<Receipt, ChainError> {
        // The transaction is already broadcast: only a decoded receipt ends the wait.
        loop {
            match self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(raw) if raw.is_null() => debug!("{tx_hash} not mined yet"),
                Ok(raw) => match serde_json::from_value::<RawReceipt>(raw) {
                    Ok(receipt) => return receipt.into_receipt(tx_hash, &self.contract),
                    Err(e) => warn!("Unreadable receipt for {tx_hash}, polling again: {e}"),
                },
                Err(e) => warn!("Receipt of {tx_hash} unavailable, polling again: {e}"),
            }

            time::sleep(self.poll).await;
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn profile(&self, account: &Address) -> Result<Option<Profile>, ChainError> {
        match self
            .view("getProfile(address)", &[Token::Address(*account)])
            .await?
        {
            Some(data) => Profile::decode(&data).map_err(ChainError::Abi),
            None => Ok(None),
        }
    }

    async fn post(&self, id: u64) -> Result<Option<Post>, ChainError> {
        match self
            .view("getPost(uint256)", &[Token::Uint(u128::from(id))])
            .await?
        {
            Some(data) => Post::decode(&data).map_err(ChainError::Abi),
            None => Ok(None),
        }
    }

    async fn posts_by_user(&self, account: &Address) -> Result<Vec<u64>, ChainError> {
        match self
            .view("getPostsByUser(address)", &[Token::Address(*account)])
            .await?
        {
            Some(data) => abi::Decoder::new(&data)
                .u64_array(0)
                .map_err(ChainError::Abi),
            None => Ok(Vec::new()),
        }
    }

    async fn has_liked(&self, id: u64, account: &Address) -> Result<bool, ChainError> {
        let tokens = [Token::Uint(u128::from(id)), Token::Address(*account)];
        match self.view("hasLiked(uint256,address)", &tokens).await? {
            Some(data) => abi::Decoder::new(&data).bool(0).map_err(ChainError::Abi),
            None => Ok(false),
        }
    }

    async fn is_following(
        &self,
        follower: &Address,
        followee: &Address,
    ) -> Result<bool, ChainError> {
        let tokens = [Token::Address(*follower), Token::Address(*followee)];
        match self.view("isFollowing(address,address)", &tokens).await? {
            Some(data) => abi::Decoder::new(&data).bool(0).map_err(ChainError::Abi),
            None => Ok(false),
        }
    }

    async fn submit(&self, write: Write) -> Result<Receipt, ChainError> {
        let from = self.account.ok_or(ChainError::NoAccounts)?;

        let mut tx = json!({
            "from": from.to_string(),
            "to": self.contract.to_string(),
            "data": to_hex(&write.calldata()),
        });
        if write.value() > 0 {
            tx["value"] = json!(format!("{:#x}", write.value()));
        }

        info!("Submitting {write} from {from}");
        let tx_hash = self
            .request("eth_sendTransaction", json!([tx]))
            .await?
            .as_str()
            .ok_or(ChainError::Malformed("transaction hash is not a string"))?
            .to_owned();
        info!("Transaction sent: {tx_hash}");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        info!(
            "Transaction {} confirmed in block {:?}, events: {:?}",
            receipt.tx_hash, receipt.block_number, receipt.events
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{body_partial_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    const CONTRACT: &str = "0x00000000000000000000000000000000000c0de0";
    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    fn ledger(server: &MockServer) -> RpcLedger {
        RpcLedger::new(server.uri(), CONTRACT.parse().unwrap(), Duration::from_millis(5))
    }

    async fn answer(server: &MockServer, rpc_method: &str, body: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn reverted_view_is_absent() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_call",
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": 3, "message": "execution reverted: Post does not exist" } }),
        )
        .await;

        assert_eq!(ledger(&server).post(9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn view_decodes_result() {
        let server = MockServer::start().await;
        let author: Address = ALICE.parse().unwrap();
        let data = abi::encode(&[
            Token::Uint(2),
            Token::Address(author),
            Token::String("hello".into()),
            Token::String(String::new()),
            Token::Uint(1_700_000_000),
            Token::Uint(0),
        ]);
        answer(
            &server,
            "eth_call",
            json!({ "jsonrpc": "2.0", "id": 1, "result": to_hex(&data) }),
        )
        .await;

        let post = ledger(&server).post(2).await.unwrap().unwrap();
        assert_eq!(post.author, author);
        assert_eq!(post.text, "hello");
        assert_eq!(post.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        assert!(ledger(&server).profile(&ALICE.parse().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn submit_waits_for_receipt() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_sendTransaction",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0xfeed" }),
        )
        .await;
        answer(
            &server,
            "eth_getTransactionReceipt",
            json!({ "jsonrpc": "2.0", "id": 2, "result": {
                "status": "0x1",
                "blockNumber": "0x10",
                "logs": [{ "address": CONTRACT, "topics": [to_hex(&Event::PostLiked.topic())] }]
            }}),
        )
        .await;

        let receipt = ledger(&server)
            .with_account(ALICE.parse().unwrap())
            .submit(Write::Like(1))
            .await
            .unwrap();

        assert_eq!(receipt.tx_hash, "0xfeed");
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.events, vec![Event::PostLiked]);
    }

    #[tokio::test]
    async fn receipt_polling_survives_gateway_errors() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_sendTransaction",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0xfeed" }),
        )
        .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        answer(
            &server,
            "eth_getTransactionReceipt",
            json!({ "jsonrpc": "2.0", "id": 4, "result": { "status": "0x1", "blockNumber": "0x2", "logs": [] } }),
        )
        .await;

        let receipt = ledger(&server)
            .with_account(ALICE.parse().unwrap())
            .submit(Write::Like(1))
            .await
            .unwrap();

        assert_eq!(receipt.block_number, Some(2));
        let sent = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains("eth_sendTransaction"))
            .count();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn failed_receipt_is_a_revert() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_sendTransaction",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0xfeed" }),
        )
        .await;
        answer(
            &server,
            "eth_getTransactionReceipt",
            json!({ "jsonrpc": "2.0", "id": 2, "result": { "status": "0x0", "logs": [] } }),
        )
        .await;

        let err = ledger(&server)
            .with_account(ALICE.parse().unwrap())
            .submit(Write::Follow(CONTRACT.parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Reverted(_)));
    }

    #[tokio::test]
    async fn declined_signature_is_reported() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_sendTransaction",
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": 4001, "message": "User denied transaction signature." } }),
        )
        .await;

        let err = ledger(&server)
            .with_account(ALICE.parse().unwrap())
            .submit(Write::Like(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Declined));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_needs_an_account() {
        let server = MockServer::start().await;

        let err = ledger(&server).submit(Write::Like(1)).await.unwrap_err();
        assert!(matches!(err, ChainError::NoAccounts));
    }

    #[tokio::test]
    async fn accounts_and_chain_id() {
        let server = MockServer::start().await;
        answer(
            &server,
            "eth_requestAccounts",
            json!({ "jsonrpc": "2.0", "id": 1, "result": [ALICE] }),
        )
        .await;
        answer(
            &server,
            "eth_chainId",
            json!({ "jsonrpc": "2.0", "id": 2, "result": "0x13fb" }),
        )
        .await;

        let ledger = ledger(&server);
        assert_eq!(
            ledger.request_accounts().await.unwrap(),
            vec![ALICE.parse::<Address>().unwrap()]
        );
        assert_eq!(ledger.chain_id().await.unwrap(), 5115);
    }
}
