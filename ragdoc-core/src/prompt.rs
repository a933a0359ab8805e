//! Prompt template that grounds the model in retrieved context.

use crate::error::{RagError, Result};

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

/// The default grounding prompt.
pub const DEFAULT_TEMPLATE: &str = "\
You are an assistant that answers questions using ONLY the documents provided in the context below.
If the answer is not contained in the context, say clearly that it does not appear in the documents.
Do not use any prior knowledge.

Context:
{context}

---

Question: {question}

Answer:";

/// A prompt with `{context}` and `{question}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Create a custom template.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless the template contains exactly one
    /// `{context}` and one `{question}` placeholder.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for slot in [CONTEXT_SLOT, QUESTION_SLOT] {
            let count = template.matches(slot).count();
            if count != 1 {
                return Err(RagError::ConfigError(format!(
                    "prompt template must contain {slot} exactly once (found {count})"
                )));
            }
        }
        Ok(Self { template })
    }

    /// Substitute the context and the question.
    ///
    /// Substitution is positional, so placeholder-like text inside the context or the
    /// question is left untouched.
    pub fn render(&self, context: &str, question: &str) -> String {
        let (first, first_value, second, second_value) = {
            let c = self.template.find(CONTEXT_SLOT).unwrap_or(usize::MAX);
            let q = self.template.find(QUESTION_SLOT).unwrap_or(usize::MAX);
            if c <= q {
                (CONTEXT_SLOT, context, QUESTION_SLOT, question)
            } else {
                (QUESTION_SLOT, question, CONTEXT_SLOT, context)
            }
        };

        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let rest = match self.template.split_once(first) {
            Some((head, tail)) => {
                out.push_str(head);
                out.push_str(first_value);
                tail
            }
            None => self.template.as_str(),
        };
        match rest.split_once(second) {
            Some((head, tail)) => {
                out.push_str(head);
                out.push_str(second_value);
                out.push_str(tail);
            }
            None => out.push_str(rest),
        }
        out
    }
}
