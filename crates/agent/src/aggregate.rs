//! Multi-assistant aggregation: participant outcomes and the interpreter prompt.

use chatrelay_core::Error;

/// How one non-interpreter participant finished.
#[derive(Debug)]
pub enum ParticipantOutcome {
    Answered(String),
    /// Timed out, or finished without any text
    NoAnswer,
    Failed(Error),
}

impl ParticipantOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Answered(text) => Some(text),
            _ => None,
        }
    }
}

/// Prompt sent to the interpreter after every participant has finished.
///
/// Lists each answer under its assistant id and names the participants that
/// gave none.
pub fn interpreter_prompt(question: &str, outcomes: &[(String, ParticipantOutcome)]) -> String {
    let mut prompt = format!("The following question has been posed:\n{question}\n\n");

    prompt.push_str("The following responses have been provided by the other assistants:\n");
    for (id, outcome) in outcomes {
        if let Some(answer) = outcome.answer() {
            prompt.push_str(&format!(">> Assistant: {id}:\n{answer}\n\n"));
        }
    }

    let silent: Vec<&str> = outcomes
        .iter()
        .filter(|(_, o)| o.answer().is_none())
        .map(|(id, _)| id.as_str())
        .collect();
    if !silent.is_empty() {
        prompt.push_str(&format!(
            "The following assistants did not provide an answer: {}\n\n",
            silent.join(", ")
        ));
    }

    prompt.push_str(
        "Please consider the responses from these assistants in relation to your understanding of the \
         question and provide one cohesive response to the question.\n\
         Some assistants may not have had the data or context needed to provide a suitable answer, or may \
         not have understood the question. Please consider this in your response.",
    );
    prompt
}
