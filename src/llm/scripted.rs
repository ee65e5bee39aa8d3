//! Scripted gateway.
//!
//! Replays canned replies in order. Used for dry runs without API keys
//! and as the deterministic player in tests. Every prompt it receives is
//! recorded for inspection.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{AgentGateway, AgentMessage, AgentReply};
use crate::protocol::Prompt;

pub struct ScriptedGateway {
    script: Vec<String>,
    queue: Mutex<VecDeque<String>>,
    cycle: bool,
    stream: bool,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(replies.iter().cloned().collect()),
            script: replies,
            cycle: false,
            stream: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Restart from the first reply once the script runs out.
    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Deliver replies word by word through `ask_stream`.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_reply(&self, prompt: &Prompt) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("Scripted gateway lock poisoned"))?;
        if queue.is_empty() && self.cycle {
            queue.extend(self.script.iter().cloned());
        }
        queue
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("Scripted gateway has no replies left"))
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn ask(&self, prompt: &Prompt) -> Result<AgentReply> {
        let text = self.next_reply(prompt)?;
        Ok(AgentReply::from_completion(&text))
    }

    async fn ask_stream(
        &self,
        prompt: &Prompt,
        sink: mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<()> {
        let text = self.next_reply(prompt)?;
        if self.stream {
            for word in text.split_inclusive(' ') {
                let _ = sink.send(AgentMessage::Chunk(word.to_string()));
            }
        }
        let _ = sink.send(AgentMessage::Final(AgentReply::from_completion(&text)));
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        self.stream
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
