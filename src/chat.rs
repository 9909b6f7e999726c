// Terminal front-end: the same session flow as the web page, over
// stdin/stdout.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::info;

use crate::error::ChatError;
use crate::session::{Phase, Session};

const QUIT: &str = "/quit";
const RESET: &str = "/reset";

async fn ask<R, W>(lines: &mut Lines<R>, output: &mut W, prompt: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(prompt.as_bytes()).await?;
    output.flush().await?;
    lines.next_line().await.context("Failed to read input")
}

async fn say<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Drive `session` from `input` until end of input or `/quit`.
pub async fn run_chat<R, W>(session: &mut Session, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    say(output, &format!("✨ 제목학원 : 나를 브랜딩 하기 ✨ ({RESET} 다시 시작, {QUIT} 종료)")).await?;

    loop {
        match session.state().phase() {
            Phase::Collecting => {
                let Some(interests) = ask(&mut lines, output, "💝 좋아하는 것을 알려주세요: ").await? else {
                    break;
                };
                if interests.trim() == QUIT {
                    break;
                }
                let Some(situation) = ask(&mut lines, output, "🌙 지금의 상황을 알려주세요: ").await? else {
                    break;
                };

                say(output, "마법의 별명을 만들고 있어요... ✨").await?;
                match session.submit_profile(&interests, &situation).await {
                    Ok(greeting) => say(output, &greeting.content).await?,
                    Err(ChatError::Validation(reason)) => say(output, &format!("⚠️ {reason}")).await?,
                    Err(err) => say(output, &format!("❌ 오류가 발생했습니다: {err}")).await?,
                }
            }
            Phase::Chatting => {
                let Some(text) = ask(&mut lines, output, "> ").await? else {
                    break;
                };
                match text.trim() {
                    QUIT => break,
                    RESET => {
                        session.reset();
                        say(output, "🔄 다시 시작할게요!").await?;
                        continue;
                    }
                    "" => continue,
                    _ => {}
                }
                chat_turn(session, &text, output).await?;
            }
        }
    }

    info!("Chat input closed");
    Ok(())
}

async fn chat_turn<W: AsyncWrite + Unpin>(session: &mut Session, text: &str, output: &mut W) -> Result<()> {
    let mut turn = match session.send_message(text).await {
        Ok(turn) => turn,
        Err(err) => return say(output, &format!("❌ 응답 생성 중 오류가 발생했습니다: {err}")).await,
    };

    while let Some(fragment) = turn.next_fragment().await {
        match fragment {
            Ok(fragment) => {
                output.write_all(fragment.as_bytes()).await?;
                output.flush().await?;
            }
            // The partial reply stays on screen but is not kept in history.
            Err(_) => break,
        }
    }
    output.write_all(b"\n").await?;

    if let Err(err) = session.commit_turn(turn).await {
        say(output, &format!("❌ 응답 생성 중 오류가 발생했습니다: {err}")).await?;
    }
    Ok(())
}
