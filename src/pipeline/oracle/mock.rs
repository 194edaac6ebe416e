use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Oracle, OracleError};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Status(u16, String),
}

impl Reply {
    fn to_result(&self) -> Result<String, OracleError> {
        match self {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(message) => Err(OracleError::Other(message.clone())),
            Reply::Status(status, body) => Err(OracleError::Status {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}

struct Rule {
    needle: String,
    replies: Vec<Reply>,
    served: usize,
}

/// Scripted oracle for tests and dry runs.
///
/// Each rule matches when its needle occurs in the user prompt; the first
/// matching rule answers. A rule with several replies serves them in order
/// and then keeps repeating the last one.
pub struct ScriptedOracle {
    rules: Mutex<Vec<Rule>>,
    fallback: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    /// Every unmatched prompt gets `fallback`.
    pub fn new(fallback: &str) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: Reply::Text(fallback.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn when(self, needle: &str, reply: &str) -> Self {
        self.push_rule(needle, vec![Reply::Text(reply.to_string())])
    }

    /// Successive answers for the same needle.
    pub fn when_seq(self, needle: &str, replies: &[&str]) -> Self {
        let replies = replies.iter().map(|r| Reply::Text(r.to_string())).collect();
        self.push_rule(needle, replies)
    }

    pub fn fail_when(self, needle: &str, message: &str) -> Self {
        self.push_rule(needle, vec![Reply::Fail(message.to_string())])
    }

    /// Answer with an HTTP-style status error (e.g. 429) `times` times, then `reply`.
    pub fn status_then(self, needle: &str, status: u16, times: usize, reply: &str) -> Self {
        let mut replies = vec![Reply::Status(status, "scripted".into()); times];
        replies.push(Reply::Text(reply.to_string()));
        self.push_rule(needle, replies)
    }

    fn push_rule(self, needle: &str, replies: Vec<Reply>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                replies,
                served: 0,
            });
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn ask(&self, _system: &str, user: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user.to_string());
        }

        let reply = {
            let mut rules = self
                .rules
                .lock()
                .map_err(|_| OracleError::Other("scripted oracle poisoned".into()))?;
            rules
                .iter_mut()
                .find(|rule| user.contains(&rule.needle))
                .and_then(|rule| {
                    let index = rule.served.min(rule.replies.len().saturating_sub(1));
                    rule.served += 1;
                    rule.replies.get(index).cloned()
                })
        };

        reply.unwrap_or_else(|| self.fallback.clone()).to_result()
    }
}
