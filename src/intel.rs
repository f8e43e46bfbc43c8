//! Address Intelligence Store. Read-only catalogue of address metadata
//! consumed by the classification phases. The catalogue ships with a seeded
//! set of exchange, DEX, protocol, and market-maker addresses and can be
//! extended from a JSON file produced by the offline discovery pipeline.

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;

use crate::error::{AppError, AppResult};
use crate::models::{AddressCategory, AddressRecord};

fn seed(
    map: &mut HashMap<(String, String), AddressRecord>,
    blockchain: &str,
    address: &str,
    category: AddressCategory,
    entity: &str,
    tags: &[&str],
) {
    let key_addr = normalize(blockchain, address);
    let mut record = AddressRecord::new(key_addr.clone(), blockchain, category, entity, 0.9);
    for tag in tags {
        record.tags.insert((*tag).to_string());
    }
    map.insert((blockchain.to_string(), key_addr), record);
}

/// EVM addresses are matched case-insensitively; other chains keep case.
fn normalize(blockchain: &str, address: &str) -> String {
    match blockchain {
        "ethereum" | "polygon" | "bsc" => address.to_lowercase(),
        _ => address.to_string(),
    }
}

lazy_static! {
    static ref SEED_CATALOGUE: HashMap<(String, String), AddressRecord> = {
        let mut m = HashMap::new();

        // Centralized exchanges (Ethereum hot wallets)
        for (addr, entity) in [
            ("0x28c6c06298d514db089934071355e5743bf21d60", "Binance"),
            ("0x21a31ee1afc51d94c2efccaa2092ad1028285549", "Binance"),
            ("0xdfd5293d8e347dfe59e90efd55b2956a1343963d", "Binance"),
            ("0x5a52e96bacdabb82fd05763e25335261b270efcb", "Binance"),
            ("0x3f5ce5fbfe3e9af3971dd833d26ba9b5c936f0be", "Binance"),
            ("0x9696f59e4d72e237be84ffd425dcad154bf96976", "Binance"),
            ("0x71660c4005ba85c37ccec55d0c4493e66fe775d3", "Coinbase"),
            ("0x503828976d22510aad0201ac7ec88293211d23da", "Coinbase"),
            ("0xddfabcdc4d8ffc6d5beaf154f18b778f892a0740", "Coinbase"),
            ("0xa090e606e30bd747d4e6245a1517ebe430f0057e", "Coinbase"),
            ("0x2910543af39aba0cd09dbb2d50200b3e800a63d2", "Kraken"),
            ("0x0a869d79a7052c7f1b55a8ebabbea3420f0d1e13", "Kraken"),
            ("0xa83b11093c858c86321fbc4c20fe82cdbd58e09e", "Kraken"),
            ("0x53d284357ec70ce289d6d64134dfac8e511c8a3d", "Kraken"),
            ("0x2b5634c42055806a59e9107ed44d43c426e58258", "KuCoin"),
            ("0x689c56aef474df92d44a1b70850f808488f9769c", "KuCoin"),
            ("0xf16e9b0d03470827a95cdfd0cb8a8a3b46969b91", "KuCoin"),
            ("0x6cc5f688a315f3dc28a7781717a9a798a59fda7b", "OKX"),
            ("0x236f9f97e0e62388479bf9e5ba4889e46b0273c3", "OKX"),
            ("0x5041ed759dd4afc3a72b8192c143f72f4724081a", "OKX"),
            ("0x0d0707963952f2fba59dd06f2b425ace40b492fe", "Gate.io"),
            ("0x1062a747393198f70f71ec65a582423dba7e5ab3", "Gate.io"),
            ("0xab5c66752a9e8167967685f1450532fb96d5d24f", "Huobi"),
            ("0x6748f50f686bfbca6fe8ad62b22228b87f31ff2b", "Huobi"),
            ("0x876eabf441b2ee5b5b0554fd502a8e0600950cfa", "Bitfinex"),
            ("0x742d35cc6634c0532925a3b844bc454e4438f44e", "Bitfinex"),
            ("0x5f65f7b609678448494de4c87521cdf6cef1e932", "Gemini"),
            ("0xd24400ae8bfebb18ca49be86258a3c749cf46853", "Gemini"),
            ("0x6262998ced04146fa42253a5c0af90ca02dfd2a3", "Crypto.com"),
            ("0x46340b20830761efd32832a74d7169b29feb9758", "Crypto.com"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::Cex, entity, &["cex", "high_activity"]);
        }

        // DEX routers and factories
        for (addr, entity) in [
            ("0x7a250d5630b4cf539739df2c5dacb4c659f2488d", "Uniswap V2 Router"),
            ("0xe592427a0aece92de3edee1f18e0157c05861564", "Uniswap V3 Router"),
            ("0x68b3465833fb72a70ecdf485e0e4c7bd8665fc45", "Uniswap V3 Router 2"),
            ("0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f", "SushiSwap Router"),
            ("0x1111111254fb6c44bac0bed2854e76f90643097d", "1inch V4 Router"),
            ("0x1111111254eeb25477b68fb85ed929f73a960582", "1inch V5 Router"),
            ("0xdef171fe48cf0115b1d80b88dc8eab59176fee57", "Paraswap V5"),
            ("0xdef1c0ded9bec7f1a1670819833240f027b25eff", "0x Exchange Proxy"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::DexRouter, entity, &["dex"]);
        }
        for (addr, entity) in [
            ("0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f", "Uniswap V2 Factory"),
            ("0x1f98431c8ad98523631ae4a59f267346ea31f984", "Uniswap V3 Factory"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::DexFactory, entity, &["dex"]);
        }
        for (addr, entity) in [
            ("0xa5e0829caced8ffdd4de3c43696c57f7d7a678ff", "QuickSwap Router"),
            ("0x1b02da8cb0d097eb8d57a175b88c7d8b47997506", "SushiSwap Router"),
            ("0xe592427a0aece92de3edee1f18e0157c05861564", "Uniswap V3 Router"),
        ] {
            seed(&mut m, "polygon", addr, AddressCategory::DexRouter, entity, &["dex"]);
        }

        // Lending pools
        for (addr, entity) in [
            ("0x7d2768de32b0b80b7a3454c06bdac94a69ddc7a9", "Aave V2 Lending Pool"),
            ("0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2", "Aave V3 Pool"),
            ("0x3d9819210a31b4961b30ef54be2aed79b9c9cd3b", "Compound Comptroller"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::LendingPool, entity, &["lending"]);
        }

        // Staking
        for (addr, entity) in [
            ("0xae7ab96520de3a18e5e111b5eaab095312d7fe84", "Lido stETH"),
            ("0x00000000219ab540356cbb839cbe05303d7705fa", "ETH2 Deposit Contract"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::StakingContract, entity, &["staking"]);
        }

        // Bridges
        for (addr, entity) in [
            ("0x40ec5b33f54e0e8a33a975908c5ba1c14e5bbbdf", "Polygon ERC20 Bridge"),
            ("0xa0c68c638235ee32657e8f720a23cec1bfc77c77", "Polygon Bridge"),
            ("0x3ee18b2214aff97000d974cf647e7c347e8fa585", "Wormhole Token Bridge"),
            ("0x8315177ab297ba92a06054ce80a67ed4dbd7ed3a", "Arbitrum Bridge"),
            ("0x99c9fc46f92e8a1c0dec1b1747d010903e884be1", "Optimism Gateway"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::Bridge, entity, &["bridge"]);
        }

        // Market makers
        for (addr, entity) in [
            ("0x56178a0d5f301baf6cf3e1cd53d9863437345bf9", "Wintermute"),
            ("0x3ccdf48c5b8040526815e47322dfd0b524f390d9", "Wintermute"),
            ("0xf584f8728b874a6a5c7a8d4d387c9aae9172d621", "Jump Trading"),
            ("0x21b2be9090d1d319e67a981d42811ba5a4e9b35e", "DV Trading"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::MarketMaker, entity, &["market_maker", "high_activity"]);
        }

        // Sanctioned mixers
        for (addr, entity) in [
            ("0x8589427373d6d84e98730d7795d8f6f8731fda16", "Tornado Cash"),
            ("0x722122df12d4e14e13ac3b6895a86e84145b6967", "Tornado Cash Proxy"),
        ] {
            seed(&mut m, "ethereum", addr, AddressCategory::MixerSanctioned, entity, &["mixer", "sanctioned"]);
        }

        // Solana exchanges
        for (addr, entity) in [
            ("5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1", "Binance"),
            ("6QEJkDV8NhHc4pUCAP3v6n5h5osHUqR1xCEhUAX8e9bL", "Binance"),
            ("FdAXT4XPsswRhaJveaB45Lz9CFbKHGpyY3rSyRFRGArj", "Bybit"),
            ("3Z4oLTsytjW5K2sgEYiDEbykerbYm6SnAJQm5kMQoZxd", "OKX"),
            ("HSsAV4suBdFgaybUwzWDK1rR14FNQ73BcF3kAM7rRkbF", "Kraken"),
            ("HU23r7UoZbqTUuh3vA7emAGztFtqwTeVips789vqxxBw", "KuCoin"),
            ("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM", "Crypto.com"),
            ("73tF8uN3BwVzUzwETv59CvCF4oqzNtkUxKdJuFLHqmD9", "Gate.io"),
            ("AFrks6SxLK3FNKpKPdpx5DsFYhQZk8VKnz9BcVQxhYaY", "Huobi"),
        ] {
            seed(&mut m, "solana", addr, AddressCategory::Cex, entity, &["cex"]);
        }

        // Solana DEX programs
        for (addr, entity) in [
            ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "Raydium AMM"),
            ("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin", "Serum DEX"),
            ("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", "Orca Whirlpools"),
            ("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "Jupiter Aggregator"),
        ] {
            seed(&mut m, "solana", addr, AddressCategory::DexRouter, entity, &["dex"]);
        }

        // XRP exchanges
        for (addr, entity) in [
            ("rLNaPoKeeBjZe2qs6x52yVPZpZ8td4dc6w", "Binance"),
            ("rEb8TK3gBgk5auZkwc6sHnwrGVJH8DuaLh", "Binance"),
            ("rJb5KsHsDHF1YS5B5DU6QCkH5NsPaKQTcy", "Binance"),
            ("rEy8TFcrAPvhpKrwyrscNYyqBGUkE9hKaJ", "Huobi"),
            ("rJHb8RCfuB89HCwE7wo4W9d8qHEQhh7bVK", "Bitstamp"),
            ("rNQEMJw3sAoXpYUe4gr9C1Js5EZK3cVUmJ", "Coinbase"),
            ("rL9vUaa1p16YWWvkmXsQEGv9uQS65AXRPS", "Kraken"),
            ("rUobSiUpHCX1WEMRaZ8C1HTqpEqwQHC5Ns", "Upbit"),
        ] {
            seed(&mut m, "xrp", addr, AddressCategory::Cex, entity, &["cex"]);
        }

        m
    };
}

pub struct AddressIntelligence {
    records: HashMap<(String, String), AddressRecord>,
}

impl AddressIntelligence {
    /// Catalogue with the built-in seeds only.
    pub fn seeded() -> Self {
        Self {
            records: SEED_CATALOGUE.clone(),
        }
    }

    /// Seeds plus records loaded from a JSON array file produced by the
    /// offline discovery jobs. Unknown entries override seeds on collision
    /// (the offline pipeline carries fresher data).
    pub fn with_snapshot(path: &Path) -> AppResult<Self> {
        let mut intel = Self::seeded();
        let data = std::fs::read_to_string(path)
            .map_err(|e| AppError::Configuration(format!("address intel file {}: {}", path.display(), e)))?;
        let records: Vec<AddressRecord> = serde_json::from_str(&data)?;
        let count = records.len();
        for mut record in records {
            record.address = normalize(&record.blockchain, &record.address);
            intel
                .records
                .insert((record.blockchain.clone(), record.address.clone()), record);
        }
        tracing::info!("✅ Address intelligence loaded: {} snapshot records, {} total", count, intel.records.len());
        Ok(intel)
    }

    pub fn lookup(&self, blockchain: &str, address: &str) -> Option<&AddressRecord> {
        let key = (blockchain.to_string(), normalize(blockchain, address));
        self.records.get(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Test-only: build a catalogue from explicit records.
    #[cfg(test)]
    pub fn from_records(records: Vec<AddressRecord>) -> Self {
        let mut map = HashMap::new();
        for mut record in records {
            record.address = normalize(&record.blockchain, &record.address);
            map.insert((record.blockchain.clone(), record.address.clone()), record);
        }
        Self { records: map }
    }
}
