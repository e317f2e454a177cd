//! Blockchain fetch collaborator.
//!
//! Thin JSON-RPC client for reading pool reserves and wallet balances.
//! Every fetch degrades to deterministic mock data when the node is
//! unreachable or the service runs in mock mode, so the pipeline can be
//! exercised without live network access.

use risk_monitor_types::{PoolSnapshot, PositionData, TokenBalance, WalletSnapshot};
use serde_json::{json, Value};

/// Rough CELO/USD price used for TVL math. The original deployment pinned
/// this rather than querying an oracle.
const NATIVE_PRICE_USD: f64 = 0.7;

const TOKEN_ADDRESSES: &[(&str, &str, f64)] = &[
    ("0x765de816845861e75a25fca122bb6898b8b1282a", "cUSD", 1.0),
    ("0xd8763cba276a3738e6de85b4b3bf5fded6d6ca73", "cEUR", 1.05),
    ("0xe8537a3d056da446677b9e9d6c5db704eaab4787", "cREAL", 0.20),
];

#[derive(Clone)]
pub struct ChainClient {
    client: reqwest::Client,
    rpc_url: String,
    mock_mode: bool,
}

impl ChainClient {
    pub fn new(rpc_url: String, mock_mode: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
            mock_mode,
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<String, String> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("RPC request failed: {}", e))?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| format!("RPC response not JSON: {}", e))?;
        data["result"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| format!("RPC error: {}", data["error"]))
    }

    /// Fetch a pool's reserves via `getReserves()` (selector 0x0902f1ac).
    pub async fn get_pool_snapshot(&self, pool_address: &str) -> PoolSnapshot {
        let pool_address = pool_address.to_lowercase();
        if !self.mock_mode {
            match self.fetch_pool(&pool_address).await {
                Ok(snapshot) => return snapshot,
                Err(e) => {
                    log::warn!(
                        "[RISK_MONITOR] Pool fetch failed for {}, using mock data: {}",
                        pool_address,
                        e
                    );
                }
            }
        }
        mock_pool_snapshot(&pool_address)
    }

    async fn fetch_pool(&self, pool_address: &str) -> Result<PoolSnapshot, String> {
        let result = self
            .rpc_call(
                "eth_call",
                json!([{"to": pool_address, "data": "0x0902f1ac"}, "latest"]),
            )
            .await?;

        let (reserve0, reserve1) = decode_reserves(&result)?;
        let reserve0_fmt = reserve0 as f64 / 1e18;
        let reserve1_fmt = reserve1 as f64 / 1e18;
        let tvl = reserve0_fmt * NATIVE_PRICE_USD + reserve1_fmt;
        let ratio = if reserve1_fmt != 0.0 {
            reserve0_fmt / reserve1_fmt
        } else {
            0.0
        };

        Ok(PoolSnapshot {
            pool_address: pool_address.to_string(),
            reserve0: reserve0.to_string(),
            reserve1: reserve1.to_string(),
            tvl,
            ratio,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Native balance in wei.
    pub async fn get_native_balance(&self, address: &str) -> Result<u128, String> {
        let result = self
            .rpc_call("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_hex_u128(&result)
    }

    /// ERC20 balance via `balanceOf(address)` (selector 0x70a08231).
    pub async fn get_token_balance(&self, address: &str, token: &str) -> Result<u128, String> {
        let padded = format!("0x70a08231{:0>64}", address.trim_start_matches("0x"));
        let result = self
            .rpc_call(
                "eth_call",
                json!([{"to": token, "data": padded}, "latest"]),
            )
            .await?;
        if result == "0x" {
            return Ok(0);
        }
        parse_hex_u128(&result)
    }

    /// Fetch a wallet's full portfolio: native balance, known stable
    /// tokens, and (if a pool is linked) its LP position.
    pub async fn get_wallet_snapshot(
        &self,
        wallet_address: &str,
        lp_pool_address: Option<&str>,
    ) -> WalletSnapshot {
        let wallet_address = wallet_address.to_lowercase();
        if !self.mock_mode {
            match self.fetch_wallet(&wallet_address, lp_pool_address).await {
                Ok(snapshot) => return snapshot,
                Err(e) => {
                    log::warn!(
                        "[RISK_MONITOR] Wallet fetch failed for {}, using mock data: {}",
                        wallet_address,
                        e
                    );
                }
            }
        }
        mock_wallet_snapshot(&wallet_address)
    }

    async fn fetch_wallet(
        &self,
        wallet_address: &str,
        lp_pool_address: Option<&str>,
    ) -> Result<WalletSnapshot, String> {
        let native_wei = self.get_native_balance(wallet_address).await?;
        let native_balance = native_wei as f64 / 1e18;
        let mut total_value = native_balance * NATIVE_PRICE_USD;

        let mut tokens = Vec::new();
        for (token_addr, symbol, usd_rate) in TOKEN_ADDRESSES {
            let wei = self
                .get_token_balance(wallet_address, token_addr)
                .await
                .unwrap_or(0);
            let balance = wei as f64 / 1e18;
            total_value += balance * usd_rate;
            if balance > 0.01 {
                tokens.push(TokenBalance {
                    token: token_addr.to_string(),
                    symbol: symbol.to_string(),
                    balance: wei.to_string(),
                    value_usd: balance * usd_rate,
                });
            }
        }

        let mut positions = Vec::new();
        if let Some(pool) = lp_pool_address {
            let lp_wei = self
                .get_token_balance(wallet_address, &pool.to_lowercase())
                .await
                .unwrap_or(0);
            if lp_wei > 0 {
                // Rough LP valuation: both sides of the pair
                let lp_value = (lp_wei as f64 / 1e18) * 2.0;
                positions.push(PositionData {
                    protocol: "Ubeswap".to_string(),
                    position_type: "Liquidity Pool".to_string(),
                    tokens: vec!["CELO".to_string(), "cUSD".to_string()],
                    value: lp_value,
                    apy: Some(15.5),
                });
            }
        }

        Ok(WalletSnapshot {
            address: wallet_address.to_string(),
            total_value_usd: total_value,
            native_balance: native_wei.to_string(),
            tokens,
            positions,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Decode the first two uint112 words of a getReserves() return value.
fn decode_reserves(hex_data: &str) -> Result<(u128, u128), String> {
    let data = hex_data.trim_start_matches("0x");
    if data.len() < 128 {
        return Err(format!("Reserve data too short: {} chars", data.len()));
    }
    let reserve0 = u128::from_str_radix(&data[0..64], 16)
        .map_err(|e| format!("Invalid reserve0 hex: {}", e))?;
    let reserve1 = u128::from_str_radix(&data[64..128], 16)
        .map_err(|e| format!("Invalid reserve1 hex: {}", e))?;
    Ok((reserve0, reserve1))
}

fn parse_hex_u128(hex: &str) -> Result<u128, String> {
    let trimmed = hex.trim_start_matches("0x");
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '0') {
        return Ok(0);
    }
    u128::from_str_radix(trimmed.trim_start_matches('0'), 16)
        .map_err(|e| format!("Invalid hex value '{}': {}", hex, e))
}

fn mock_pool_snapshot(pool_address: &str) -> PoolSnapshot {
    PoolSnapshot {
        pool_address: pool_address.to_string(),
        reserve0: "1000000000000000000000".to_string(),
        reserve1: "1000000000000000000000".to_string(),
        tvl: 2000.0,
        ratio: 1.0,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

fn mock_wallet_snapshot(wallet_address: &str) -> WalletSnapshot {
    WalletSnapshot {
        address: wallet_address.to_string(),
        total_value_usd: 1000.0,
        native_balance: "1000000000000000000".to_string(),
        tokens: vec![],
        positions: vec![],
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reserves_splits_words() {
        let reserve0 = format!("{:064x}", 1_500_000_000_000_000_000_000u128);
        let reserve1 = format!("{:064x}", 2_000_000_000_000_000_000_000u128);
        let hex = format!("0x{}{}", reserve0, reserve1);
        let (r0, r1) = decode_reserves(&hex).unwrap();
        assert_eq!(r0, 1_500_000_000_000_000_000_000);
        assert_eq!(r1, 2_000_000_000_000_000_000_000);
    }

    #[test]
    fn decode_reserves_rejects_short_data() {
        assert!(decode_reserves("0x1234").is_err());
    }

    #[test]
    fn parse_hex_handles_zero_and_values() {
        assert_eq!(parse_hex_u128("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u128("0x").unwrap(), 0);
        assert_eq!(parse_hex_u128("0xde0b6b3a7640000").unwrap(), 1e18 as u128);
    }

    #[tokio::test]
    async fn mock_mode_returns_deterministic_snapshots() {
        let client = ChainClient::new("http://unused".to_string(), true);
        let pool = client.get_pool_snapshot("0xPOOL").await;
        assert_eq!(pool.pool_address, "0xpool");
        assert_eq!(pool.tvl, 2000.0);
        assert_eq!(pool.ratio, 1.0);

        let wallet = client.get_wallet_snapshot("0xWALLET", None).await;
        assert_eq!(wallet.address, "0xwallet");
        assert_eq!(wallet.total_value_usd, 1000.0);
    }
}
