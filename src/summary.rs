//! Shutdown report: aggregated per-symbol flow statistics, transfer
//! volumes, and dedup totals printed when the process exits cleanly.

use crate::dedup::DedupStats;
use crate::server::AppState;

fn trend_arrow(buy_pct: f64) -> &'static str {
    if buy_pct > 55.0 {
        "↑"
    } else if buy_pct < 45.0 {
        "↓"
    } else {
        "→"
    }
}

pub async fn print_final_report(state: &AppState) {
    let counters = state.store.token_counters().await;
    let volumes = state.store.transfer_volumes().await;
    let dedup: DedupStats = state.dedup_stats.read().await.clone();

    println!("\n{}", "=".repeat(100));
    println!("{:^100}", "FINAL ANALYSIS REPORT");
    println!("{}", "=".repeat(100));
    println!(
        "\nAnalysis Period End: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let mut rows: Vec<(&String, u64, u64)> = counters
        .iter()
        .map(|(symbol, c)| (symbol, c.buys, c.sells))
        .filter(|(_, buys, sells)| buys + sells > 0)
        .collect();
    rows.sort_by(|a, b| (b.1 + b.2).cmp(&(a.1 + a.2)));

    println!("\n1. TRANSACTION STATISTICS");
    println!("{}", "-".repeat(100));
    println!(
        "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "COIN", "BUYS", "SELLS", "TOTAL", "BUY %", "SELL %", "TREND"
    );
    println!("{}", "-".repeat(100));
    for (symbol, buys, sells) in &rows {
        let total = buys + sells;
        let buy_pct = *buys as f64 / total as f64 * 100.0;
        let sell_pct = 100.0 - buy_pct;
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>7.1}% {:>7.1}% {:>6}",
            symbol,
            buys,
            sells,
            total,
            buy_pct,
            sell_pct,
            trend_arrow(buy_pct)
        );
    }
    if rows.is_empty() {
        println!("(no directional transactions observed)");
    }

    if !rows.is_empty() {
        println!("\n2. MARKET MOMENTUM");
        println!("{}", "-".repeat(100));
        let mut momentum = rows.clone();
        momentum.sort_by(|a, b| {
            let a_pct = a.1 as f64 / (a.1 + a.2) as f64;
            let b_pct = b.1 as f64 / (b.1 + b.2) as f64;
            b_pct.partial_cmp(&a_pct).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (symbol, buys, sells) in momentum.iter().take(5) {
            let total = buys + sells;
            let buy_pct = *buys as f64 / total as f64 * 100.0;
            println!(
                "  • {:<8} buy: {:>5.1}%  sell: {:>5.1}%  ({} transactions)",
                symbol,
                buy_pct,
                100.0 - buy_pct,
                total
            );
        }
    }

    if !volumes.is_empty() {
        println!("\n3. TRANSFER VOLUME");
        println!("{}", "-".repeat(100));
        println!(
            "{:<10} {:>18} {:>12} {:>12}",
            "TOKEN", "VOLUME", "TRANSFERS", "ADDRESSES"
        );
        println!("{}", "-".repeat(100));
        let mut volume_rows: Vec<_> = volumes.iter().collect();
        volume_rows.sort_by(|a, b| {
            b.1.volume.partial_cmp(&a.1.volume).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (token, tracker) in volume_rows {
            println!(
                "{:<10} {:>18.2} {:>12} {:>12}",
                token,
                tracker.volume,
                tracker.transfers,
                tracker.addresses.len()
            );
        }
    }

    println!("\n4. DEDUPLICATION");
    println!("{}", "-".repeat(100));
    println!("Total received:    {}", dedup.total_received);
    println!("Unique forwarded:  {}", dedup.unique_transactions);
    println!("Duplicates caught: {}", dedup.duplicates_caught);
    println!("Dedup ratio:       {:.2}%", dedup.dedup_ratio());

    println!("\nAnalysis complete.");
    println!("{}", "=".repeat(100));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_arrows() {
        assert_eq!(trend_arrow(70.0), "↑");
        assert_eq!(trend_arrow(30.0), "↓");
        assert_eq!(trend_arrow(50.0), "→");
    }
}
