//! Grounding prompt construction.

/// Wrap concatenated document text in the fixed answering instructions.
pub fn make_context(documents_text: &str) -> String {
    format!(
        "You are a helpful assistant. Use ONLY the following documents to answer.\n\
         \n\
         ### DOCUMENTS\n\
         {documents_text}\n\
         \n\
         ### RULES\n\
         - If the answer is not in the documents, say you don't know.\n\
         - Keep answers concise unless asked for details."
    )
}
