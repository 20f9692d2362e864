//! Prompt construction for the two generation calls of a chain run.
//!
//! - [`alternative_query_messages`] asks the model for 2-3 rephrasings of the
//!   latest question (translating non-English input first).
//! - [`answer_messages`] builds the grounded answer prompt: one system message
//!   carrying the [`Persona`], the answering rules, and the retrieved context,
//!   followed by the chat history and the question.

use crate::models::Message;

/// Context placeholder used when retrieval returned nothing.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// Sentence the model is told to use when the handbook lacks the answer.
pub const DONT_KNOW: &str = "I don't have information on that specific topic based on the handbook.";

/// Who the assistant is. Supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub full_description: String,
    pub additional_prompt: Option<String>,
}

const QUERY_GENERATOR_INSTRUCTIONS: &str = "\
You are an expert query generator and translator. Your goal is to rephrase the user's \
latest question in 2-3 different ways to improve search results in a vector database \
containing a school handbook, considering the preceding conversation context.

Instructions:
1. Analyze the provided chat history and the latest user question.
2. If the latest question is not in English, provide the English translation as the first \
alternative. Then provide 1-2 additional rephrased versions in English, informed by the context.
3. For English questions, generate 2-3 alternative phrasings. Focus on using synonyms, \
different sentence structures, or breaking down the question if complex, while maintaining \
the core intent revealed in the conversation.
4. Respond ONLY with the alternative queries, each on a new line. Do not include the original \
query or any explanations.";

const TONE: &str = "\
**Your Tone:** Be helpful, informative, and maintain a slightly formal, respectful tone \
appropriate for a university setting. Be concise and clear in your answers.";

const GENERAL_INSTRUCTIONS: &str = "\
**General Instructions:**
- Answer questions based *only* on the provided context below. Consider all parts of the context provided.
- If the question requires simple reasoning or calculation based *directly* on the information in \
the context, perform it. For example, if the context states \"3 tardies equal 1 absence\" and the user \
asks \"How many tardies equal 8 absences?\", you should calculate and state the answer \
(e.g., \"24 tardies equal 8 absences.\").
- **Apply the information and results from the context (including any calculations you perform) to \
answer related follow-up questions.** Recognize synonyms or closely related terms (e.g., 'late' and \
'tardy') when applying the context. If a previous step established a fact (like 24 tardies = 8 \
absences), use that fact to answer subsequent questions about the consequences \
(e.g., \"what happens with 8 absences?\").
- Do not use introductory phrases like \"Based on the context...\" or \"The context states...\". Answer directly.";

/// Messages asking for alternative phrasings of `input`.
///
/// History, when given, sits between the instructions and the request so the
/// model can resolve follow-up questions.
pub fn alternative_query_messages(input: &str, history: Option<&[Message]>) -> Vec<Message> {
    let history = history.unwrap_or_default();
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(QUERY_GENERATOR_INSTRUCTIONS));
    messages.extend_from_slice(history);
    messages.push(Message::user(format!(
        "Generate alternative search queries for the last question: '{}'",
        input
    )));
    messages
}

/// The system prompt with `context` filled in.
pub fn system_prompt(persona: &Persona, context: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona.full_description.trim());
    prompt.push_str("\n\n");
    prompt.push_str(TONE);
    prompt.push_str("\n\n");
    prompt.push_str(GENERAL_INSTRUCTIONS);
    prompt.push_str(&format!(
        "\n- If the answer or the information needed for reasoning/calculation is not found in the \
         context, state clearly: \"{}\" Do not invent answers or provide information outside the handbook.",
        DONT_KNOW
    ));
    if let Some(extra) = persona
        .additional_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        prompt.push_str("\n- ");
        prompt.push_str(extra);
    }
    prompt.push_str("\n\nContext:\n---\n");
    prompt.push_str(context);
    prompt.push_str("\n---");
    prompt
}

/// Grounded answer prompt: system, then history, then the question.
pub fn answer_messages(
    persona: &Persona,
    input: &str,
    context: &str,
    history: Option<&[Message]>,
) -> Vec<Message> {
    let history = history.unwrap_or_default();
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt(persona, context)));
    messages.extend_from_slice(history);
    messages.push(Message::user(input));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn persona() -> Persona {
        Persona {
            name: "Emma".to_string(),
            full_description: "My name is Emma.".to_string(),
            additional_prompt: Some("Refer to the school as 'the University'.".to_string()),
        }
    }

    #[test]
    fn test_alternative_prompt_without_history() {
        let messages = alternative_query_messages("What is the tardy policy?", None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), Role::System);
        assert!(messages[0].content().contains("2-3 different ways"));
        assert!(messages[0].content().contains("English translation"));
        assert_eq!(
            messages[1].content(),
            "Generate alternative search queries for the last question: 'What is the tardy policy?'"
        );
    }

    #[test]
    fn test_alternative_prompt_keeps_history_order() {
        let history = vec![Message::user("Hi"), Message::assistant("Hello!")];
        let messages = alternative_query_messages("And uniforms?", Some(&history));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content(), "Hi");
        assert_eq!(messages[2].role(), Role::Assistant);
        assert_eq!(messages[3].role(), Role::User);
    }

    #[test]
    fn test_answer_prompt_structure() {
        let history = vec![Message::user("Hi"), Message::assistant("Hello!")];
        let messages = answer_messages(
            &persona(),
            "How many tardies equal 8 absences?",
            "Three tardies equal one absence.",
            Some(&history),
        );
        assert_eq!(messages.len(), 4);
        let system = messages[0].content();
        assert_eq!(messages[0].role(), Role::System);
        assert!(system.starts_with("My name is Emma."));
        assert!(system.contains(DONT_KNOW));
        assert!(system.contains("Do not use introductory phrases like \"Based on the context...\""));
        assert!(system.contains("- Refer to the school as 'the University'."));
        assert!(system.ends_with("Context:\n---\nThree tardies equal one absence.\n---"));
        assert_eq!(messages[3].content(), "How many tardies equal 8 absences?");
    }

    #[test]
    fn test_answer_prompt_with_sentinel_and_no_extra_rules() {
        let mut persona = persona();
        persona.additional_prompt = None;
        let messages = answer_messages(&persona, "Where is the gym?", NO_CONTEXT, None);
        assert_eq!(messages.len(), 2);
        let system = messages[0].content();
        assert!(system.contains("---\nNo relevant context found.\n---"));
        assert!(!system.contains("the University"));
    }
}
