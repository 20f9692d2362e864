//! Interactive chat loop for `handbook chat`.
//!
//! Reads one question per line after a `> ` prompt, prints the answer, and
//! keeps the conversation history for the lifetime of the loop. The literal
//! line `quit` or end of input ends the session.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::chain::RetrievalChain;
use crate::error::{AssistantError, Result};
use crate::models::{ChainInput, Message};

const PROMPT: &str = "> ";
const QUIT: &str = "quit";

fn io_error(e: std::io::Error) -> AssistantError {
    AssistantError::Other(e.into())
}

/// Run the chat loop until `quit` or EOF. Returns the final history.
///
/// A failed turn is reported on the writer and leaves the history untouched.
pub async fn run_chat<R, W>(chain: &RetrievalChain, reader: R, mut writer: W) -> Result<Vec<Message>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut history: Vec<Message> = Vec::new();
    let mut lines = reader.lines();

    loop {
        writer.write_all(PROMPT.as_bytes()).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;

        let Some(line) = lines.next_line().await.map_err(io_error)? else {
            break;
        };
        if line == QUIT {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let input = ChainInput::new(line.clone()).with_history(history.clone());
        match chain.invoke(input).await {
            Ok(output) => {
                writer
                    .write_all(format!("{}\n", output.answer).as_bytes())
                    .await
                    .map_err(io_error)?;
                history.push(Message::user(line));
                history.push(Message::assistant(output.answer));
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat turn failed");
                writer
                    .write_all(format!("Error: {}\n", e).as_bytes())
                    .await
                    .map_err(io_error)?;
            }
        }
    }

    writer.flush().await.map_err(io_error)?;
    Ok(history)
}
