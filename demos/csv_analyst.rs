//! The `csv_analyst` preset on a generated OHLCV file.
//!
//! By default the analyst's model replies are scripted so the demo runs
//! offline; the snippets themselves execute for real. Pass `--live` to use
//! the Ollama model from the preset instead.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use econ_swarm::llm::ChatMessage;
use econ_swarm::{Config, Ctx, ScriptedClient};
use serde_json::json;

fn sample_csv() -> String {
    let mut csv = String::from("Date,Open,High,Low,Close,Volume\n");
    let mut close = 100.0_f64;
    for day in 0..90 {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.checked_add_days(chrono::Days::new(day)))
            .map(|d| d.to_string())
            .unwrap_or_default();
        let drift = ((day as f64) / 7.0).sin() * 1.5 + 0.1;
        let open = close;
        close = (close + drift).max(1.0);
        let (high, low) = (open.max(close) + 0.8, open.min(close) - 0.8);
        let volume = 1_000 + (day * 37) % 400;
        let _ = writeln!(csv, "{date},{open:.2},{high:.2},{low:.2},{close:.2},{volume}");
    }
    csv
}

const INDICATORS: &str = "\
df['ret'] = df.close.pct_change()
df['log_ret'] = ta.log_return(df.close)
df['cum_ret'] = ta.cum_return(df.close)
df['rsi_14'] = ta.rsi(df.close, 14)
df['ema_20'] = ta.ema(df.close, 20)
df['sma_50'] = ta.sma(df.close, 50)
m = ta.macd(df.close, 12, 26, 9)
df['macd_hist'] = m['hist']
bb = ta.bollinger(df.close, 20, 2)
df['bb_upper'] = bb['upper']
df['bb_lower'] = bb['lower']
df['vwap'] = ta.vwap(df)
oversold = (df.rsi_14 < 30) & (df.close > df.ema_20)
overbought = (df.rsi_14 > 70) & (df.close < df.ema_20)
df['signal'] = ta.where(oversold, 'oversold_bounce', ta.where(overbought, 'overbought_fade', 'neutral'))
print(df.select(['close', 'rsi_14', 'ema_20', 'macd_hist', 'signal']).tail(3))";

const EXPORTS: &str = "\
df.select(['close', 'ret', 'log_ret', 'cum_ret', 'rsi_14', 'ema_20', 'sma_50', 'macd_hist', 'vwap', 'signal']).to_csv('metrics.csv', index=True)
summary = {
    'rows': len(df),
    'last_close': df.close.last(),
    'last_rsi': round(df.rsi_14.last(), 2),
    'last_macd_hist': round(df.macd_hist.last(), 4),
    'last_signal': df.signal.last(),
    'total_return': round(df.cum_ret.last(), 4),
}
write_json('profile.json', summary)
json(summary)";

fn script() -> ScriptedClient {
    ScriptedClient::new([
        ChatMessage::tool_call("run_analysis", json!({"code": "```python\nprint(df.info())\ndf.tail(3)\n```"})),
        ChatMessage::tool_call("run_analysis", json!({"code": INDICATORS})),
        ChatMessage::tool_call("run_analysis", json!({"code": EXPORTS})),
        ChatMessage::assistant(
            "Indicators computed, metrics.csv and profile.json written. The summary above has \
             the last close, RSI, MACD histogram and signal. TERMINATE",
        ),
    ])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let live = std::env::args().any(|a| a == "--live");

    let dir = tempfile::tempdir().context("failed to create a scratch directory")?;
    let csv_path = dir.path().join("ohlcv.csv");
    std::fs::write(&csv_path, sample_csv()).context("failed to write sample data")?;

    let mut config = Config::preset("csv_analyst")?.with_csv(csv_path.to_string_lossy());
    if let Some(data) = &mut config.data {
        data.workdir = dir.path().to_path_buf();
    }

    let session = config.open_session()?.context("preset has no data section")?;
    let ctx = Ctx::new().with_session(session);
    let mut ctx = if live {
        ctx.with_client(config.chat_client())
    } else {
        ctx.with_client(script())
    };

    let mut team = config.build_team(&config.tool_box())?;
    let result = team.run(
        "Compute returns, RSI(14), EMA(20), SMA(50), MACD(12,26,9), Bollinger(20,2) and VWAP, \
         add a signal column, save metrics.csv and profile.json, and report the last values.",
        &mut ctx,
    )?;

    println!("{}", result.conversation);
    println!("\nstopped: {}", result.stop_reason);
    for name in ["metrics.csv", "profile.json"] {
        let path = dir.path().join(name);
        if path.exists() {
            println!("wrote {}", path.display());
        }
    }
    if let Ok(profile) = std::fs::read_to_string(dir.path().join("profile.json")) {
        println!("{profile}");
    }
    Ok(())
}
