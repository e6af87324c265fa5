use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{EngineCommand, EngineState};
use engine::{EngineHandle, EngineStatus};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: EngineHandle,
    pub allowed_chat_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "SignalBot commands:")]
pub enum Command {
    #[command(description = "Start the signal loop")]
    Start,
    #[command(description = "Stop the signal loop")]
    Stop,
    #[command(description = "Show engine, risk and market status")]
    Status,
    #[command(description = "Clear the loss streak and drawdown halt")]
    ResetDrawdown,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::ResetDrawdown].endpoint(handle_reset_drawdown));

    Update::filter_message()
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from chats not in the allowed list.
async fn auth_filter(msg: Message, deps: Arc<BotDeps>) -> bool {
    let chat_id = msg.chat.id.0;
    let allowed = deps.allowed_chat_ids.contains(&chat_id);
    if !allowed {
        warn!(chat_id, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    if state == EngineState::Stopped {
        deps.engine.send(EngineCommand::Start).await;
        bot.send_message(msg.chat.id, "Engine started.").await?;
    } else {
        bot.send_message(msg.chat.id, format!("Engine is already {state}.")).await?;
    }
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    if state == EngineState::Stopped {
        bot.send_message(msg.chat.id, "Engine is already stopped.").await?;
    } else {
        deps.engine.send(EngineCommand::Stop).await;
        bot.send_message(msg.chat.id, "Engine stopped.").await?;
    }
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let status = deps.engine.status().await;
    bot.send_message(msg.chat.id, status_text(&status)).await?;
    Ok(())
}

async fn handle_reset_drawdown(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    if state != EngineState::Halted {
        bot.send_message(msg.chat.id, "No active drawdown halt.").await?;
    } else {
        deps.engine.send(EngineCommand::ResetDrawdown).await;
        bot.send_message(msg.chat.id, "Drawdown reset. Engine resuming.").await?;
    }
    Ok(())
}

pub fn status_text(status: &EngineStatus) -> String {
    let risk = &status.risk;
    let last = status
        .last_cycle_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".into());
    let win_rate = risk
        .win_rate
        .map(|w| format!("{w:.1}%"))
        .unwrap_or_else(|| "n/a".into());

    let mut text = format!(
        "SignalBot Status\n\
         Engine: {state}\n\
         Cycles: {cycles} (last {last})\n\
         Balance: {balance:.2} (peak {peak:.2}, drawdown {dd:.2}%)\n\
         Daily PnL: {daily:+.2}%\n\
         Trades: {trades}, win rate {win_rate}\n\
         Streak: {wins}W / {losses}L\n\
         Open positions: {open}\n\
         Signals last hour: {recent}",
        state = status.state,
        cycles = status.cycles,
        balance = risk.balance,
        peak = risk.peak_balance,
        dd = risk.drawdown_pct,
        daily = risk.daily_pnl,
        trades = risk.total_trades,
        wins = risk.win_streak,
        losses = risk.loss_streak,
        open = risk.open_positions,
        recent = status.signals_last_hour,
    );

    if !status.markets.is_empty() {
        text.push('\n');
        for (symbol, m) in &status.markets {
            text.push_str(&format!(
                "\n{symbol}: {}, volatility {}, R:R {:.2}, risk {}",
                m.regime, m.volatility_regime, m.recommended_rr, m.risk_level
            ));
        }
    }
    text
}
