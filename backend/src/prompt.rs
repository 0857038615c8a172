//! Prompt construction for the document chat endpoints.

use docchat_common::ChatMessage;

const SUMMARY_SYSTEM: &str = "You are a helpful assistant that summarizes document content.";

/// Ask for a one-sentence summary of `content`.
pub fn summarize(content: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SUMMARY_SYSTEM),
        ChatMessage::user(format!(
            "Summarize the following document content in one sentence:\n\n{}",
            content
        )),
    ]
}

/// Answer `question` using only `context`.
pub fn question(context: &str, question: &str) -> Vec<ChatMessage> {
    let system = format!(
        "You are a helpful assistant. Please respond based on the following document:\n\
         {}\n\
         If the question isn't related to the provided documents, politely inform the user \
         that you can only answer questions about the selected documents.",
        context
    );

    vec![ChatMessage::system(system), ChatMessage::user(question)]
}
