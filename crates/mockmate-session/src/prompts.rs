//! Prompt templates for the chat-completion evaluator.

use crate::evaluator::EvaluationRequest;
use crate::session::RoundContext;

/// System instruction for the opening of an interview.
pub const OPENING_SYSTEM: &str = r#"You are a professional interviewer running a live, spoken mock interview.
Greet the candidate briefly and ask the first question for the round described by the user.

Rules:
- Keep the greeting to one or two sentences; it will be read aloud
- The first question must fit the role, experience level and round type
- Do not use markdown or lists

Respond with JSON only:
{"greeting": "...", "firstQuestion": "..."}"#;

/// User prompt for the opening. Placeholders are filled by `opening_user_prompt`.
pub const OPENING_USER_TEMPLATE: &str = r#"Role: {job_role}
Experience level: {experience_level}
Round type: {round_type}

Candidate resume:
---
{resume_text}
---"#;

/// System instruction for evaluating one answer and choosing the next action.
pub const TURN_SYSTEM: &str = r#"You are a professional interviewer running a live, spoken mock interview.
You receive the question just asked, the candidate's answer and every question asked so far.

Rules:
- React to the answer in one or two natural spoken sentences (verbalReaction)
- Never repeat a question from the previous questions list
- If the candidate is stuck or struggled to articulate an answer, you may offer a hint:
  set isOfferingHint to true and put a simpler or guiding version of the question in nextQuestion
- Set requestCodingTask to true when the next question should be answered with code
- Set isInterviewComplete to true only when the interview should end now
- detectedEmotion is one word describing the candidate's apparent state (e.g. confident, nervous, confused)

Respond with JSON only:
{"verbalReaction": "...", "detectedEmotion": "...", "nextQuestion": "...", "isInterviewComplete": false, "isOfferingHint": false, "requestCodingTask": false}"#;

pub const TURN_USER_TEMPLATE: &str = r#"Role: {job_role}
Experience level: {experience_level}
Round type: {round_type}

Candidate resume:
---
{resume_text}
---

Previous questions:
{previous_questions}

Question just asked: {question}
Candidate answer: {answer}
Candidate appears stuck: {is_stuck}
{code_section}"#;

fn resume_or_placeholder(resume: &str) -> &str {
    if resume.trim().is_empty() {
        "(not provided)"
    } else {
        resume
    }
}

pub fn opening_user_prompt(ctx: &RoundContext) -> String {
    OPENING_USER_TEMPLATE
        .replace("{job_role}", &ctx.job_role)
        .replace("{experience_level}", &ctx.experience_level)
        .replace("{round_type}", &ctx.round_type)
        .replace("{resume_text}", resume_or_placeholder(&ctx.resume_text))
}

pub fn turn_user_prompt(req: &EvaluationRequest) -> String {
    let previous = if req.previous_questions.is_empty() {
        "(none)".to_string()
    } else {
        req.previous_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let code_section = match req.code_submission.as_deref() {
        Some(code) => format!("\nCode submitted with the answer:\n```\n{}\n```", code),
        None => String::new(),
    };
    TURN_USER_TEMPLATE
        .replace("{job_role}", &req.job_role)
        .replace("{experience_level}", &req.experience_level)
        .replace("{round_type}", &req.round_type)
        .replace("{resume_text}", resume_or_placeholder(&req.resume_text))
        .replace("{previous_questions}", &previous)
        .replace("{question}", &req.question)
        .replace("{answer}", &req.answer)
        .replace("{is_stuck}", if req.is_stuck { "yes" } else { "no" })
        .replace("{code_section}", &code_section)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_prompt_lists_history_and_code() {
        let ctx = RoundContext::new("Backend Engineer", "junior", "technical");
        let req = EvaluationRequest::new(
            "Reverse a list",
            "I would iterate backwards",
            &ctx,
            vec!["Tell me about yourself.".into(), "Reverse a list".into()],
            false,
        )
        .with_code_submission(Some("fn rev() {}".into()));
        let prompt = turn_user_prompt(&req);
        assert!(prompt.contains("1. Tell me about yourself."));
        assert!(prompt.contains("2. Reverse a list"));
        assert!(prompt.contains("fn rev() {}"));
        assert!(prompt.contains("Candidate appears stuck: no"));
        assert!(prompt.contains("(not provided)"));
    }

    #[test]
    fn opening_prompt_fills_context() {
        let ctx = RoundContext::new("Data Analyst", "senior", "behavioral").with_resume("SQL, dbt");
        let prompt = opening_user_prompt(&ctx);
        assert!(prompt.contains("Role: Data Analyst"));
        assert!(prompt.contains("Round type: behavioral"));
        assert!(prompt.contains("SQL, dbt"));
    }
}
