//! `parley say`: post a human message into a session.

use crate::runtime::Runtime;
use parley_core::message::NewMessage;

pub async fn run(rt: &Runtime, session: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    let content = message.trim();
    if content.is_empty() {
        return Err("Message is empty".into());
    }
    let stored = rt.repo.append_message(NewMessage::human(&session.id, content)).await?;
    println!("  You > {} (#{})", stored.content, stored.seq);
    Ok(())
}
