//! Judge prompts for the three answer-quality metrics.
//!
//! Placeholders (`{question}`, `{answer}`, `{contexts}`) are substituted by
//! the caller with `str::replace`.

/// Collection of prompts used by the LLM scoring path.
pub struct Prompts;

impl Prompts {
    /// Shared system prompt for every judge call.
    pub fn judge_system() -> &'static str {
        "You are a strict evaluator of retrieval-augmented answers. You only reply with JSON."
    }

    /// Extract claims from the answer and verify each against the context.
    pub fn faithfulness() -> &'static str {
        r#"Your job is to check whether an answer is supported by the retrieved context.

Context:
{contexts}

Answer: {answer}

First break the answer into its individual factual claims. Then decide, for each claim, whether it can be directly inferred from the context above. Do not use outside knowledge.

return the following JSON format:
{
    "claims": [
        {"claim": "<claim text>", "supported": <true or false>},
        ...
    ]
}

Directly return the final JSON structure. Do not output anything else."#
    }

    /// Rate how directly the answer addresses the question.
    pub fn answer_relevancy() -> &'static str {
        r#"Your job is to judge whether an answer addresses the question that was asked.

Question: {question}

Answer: {answer}

Write the question this answer most plausibly responds to, then rate how well the answer addresses the original question on a scale from 0.0 (unrelated) to 1.0 (fully addresses it). An answer is noncommittal if it is evasive, vague or says it does not know.

return the following JSON format:
{
    "generated_question": "<question the answer responds to>",
    "relevancy": <number between 0.0 and 1.0>,
    "noncommittal": <true or false>
}

Directly return the final JSON structure. Do not output anything else."#
    }

    /// Give a relevant/irrelevant verdict per retrieved chunk, in order.
    pub fn context_precision() -> &'static str {
        r#"Your job is to decide which retrieved context chunks were useful for answering the question.

Question: {question}

Answer: {answer}

Retrieved context (in ranked order):
{contexts}

For every chunk, in the same order, decide whether it was useful in arriving at the answer.

return the following JSON format:
{
    "verdicts": [
        {"chunk": <chunk number>, "useful": <true or false>},
        ...
    ]
}

Directly return the final JSON structure. Do not output anything else."#
    }

    /// Render contexts as numbered chunks for substitution into prompts.
    pub fn numbered_contexts(contexts: &[String]) -> String {
        contexts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[Chunk {}]: {}", i, c))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
