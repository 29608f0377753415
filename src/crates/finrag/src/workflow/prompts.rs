//! Task names and short instructions for the structured LLM.
//!
//! The task name identifies a call in logs and in scripted tests; the
//! instruction is sent as the system prompt.

pub mod tasks {
    pub const SAFETY_CHECK: &str = "safety_check";
    pub const MERGE_CONTEXT: &str = "merge_context";
    pub const DECIDE_PATH: &str = "decide_path";
    pub const DECIDE_FINANCIAL_PATH: &str = "decide_financial_path";
    pub const CLARIFY: &str = "clarify";
    pub const REFINE_QUERY: &str = "refine_query";
    pub const EXTRACT_REPORT: &str = "extract_report";
    pub const GENERAL_ANSWER: &str = "general_answer";
    pub const EXPAND_QUESTION: &str = "expand_question";
    pub const EXTRACT_METADATA: &str = "extract_metadata";
    pub const HYDE: &str = "hyde";
    pub const GRADE_DOCUMENT: &str = "grade_document";
    pub const GENERATE_ANSWER: &str = "generate_answer";
    pub const CHECK_HALLUCINATION: &str = "check_hallucination";
    pub const GRADE_ANSWER: &str = "grade_answer";
    pub const DECOMPOSE: &str = "decompose";
    pub const CRITIQUE: &str = "critique_decomposition";
    pub const REWRITE_SERIAL: &str = "rewrite_serial_question";
    pub const COMBINE_ANSWERS: &str = "combine_answers";
    pub const CHECK_SUFFICIENCY: &str = "check_sufficiency";
    pub const GENERATE_PERSONAS: &str = "generate_personas";
    pub const PERSONA_QUESTIONS: &str = "persona_questions";
    pub const SUPERVISE_QUESTIONS: &str = "supervise_questions";
    pub const SUMMARIZE_PERSONAS: &str = "summarize_personas";
    pub const EXTRACT_KPI_VALUE: &str = "extract_kpi_value";
    pub const FOLLOW_UPS: &str = "follow_ups";
}

/// Fixed answer for refused or unanswerable queries
pub const REFUSAL: &str = "I am unable to answer this question.";

pub const SAFETY_CHECK: &str = "Decide whether the request is safe to answer as a financial \
research assistant. Flag requests for harmful, illegal or abusive content.";

pub const MERGE_CONTEXT: &str = "Rewrite the latest user query as a standalone question using \
the conversation. If the conversation already fully answers it, say so and give that answer.";

pub const DECIDE_PATH: &str = "Classify the query: `general` for questions any assistant can \
answer, `web` for current events, `financial` for questions about company filings, `reason` \
for multi-step analysis over filings.";

pub const DECIDE_FINANCIAL_PATH: &str = "Classify the financial question: `simple_financial` \
for a single fact, `complex_financial` when it needs several sub-questions, `analysis` for KPI \
or ratio analysis, `persona` for open-ended investment research.";

pub const CLARIFY: &str = "Ask at most one clarifying question that would change the answer, \
or return question_type `none` when the query is clear enough.";

pub const REFINE_QUERY: &str = "Rewrite the original query so it includes every clarification.";

pub const EXTRACT_REPORT: &str = "Extract the company, fiscal year and filing type the question \
is about. Leave fields empty when the question does not name them.";

pub const GENERAL_ANSWER: &str = "Answer the question directly and concisely.";

pub const EXPAND_QUESTION: &str = "Rewrite the question for semantic search over financial \
filings, expanding abbreviations and adding synonyms.";

pub const EXTRACT_METADATA: &str = "Extract filing metadata named in the question: companies, \
years, quarters, filing types, 10-K items and topics. Only include values the question states.";

pub const HYDE: &str = "Write a short passage from a financial filing that would answer the \
question.";

pub const GRADE_DOCUMENT: &str = "Decide whether the document contains information relevant to \
the question. Give a relevance score between 0 and 1.";

pub const GENERATE_ANSWER: &str = "Answer the question using only the documents. Cite documents \
inline by their bracketed identifier and list every identifier you cited.";

pub const CHECK_HALLUCINATION: &str = "Decide whether the answer states facts that the documents \
do not support or contradict. Paraphrase is fine.";

pub const GRADE_ANSWER: &str = "Decide whether the answer resolves the question. Explain what is \
missing when it does not.";

pub const DECOMPOSE: &str = "Split the question into groups of sub-questions. Groups are \
independent of each other; within a group each question may depend on the answers before it.";

pub const CRITIQUE: &str = "Review the decomposition. Reply exactly `No changes.` when it covers \
the question without redundancy, otherwise list the changes to make.";

pub const REWRITE_SERIAL: &str = "Rewrite the next question so it is self-contained, substituting \
the earlier answers it depends on.";

pub const COMBINE_ANSWERS: &str = "Combine the sub-answers into one answer to the main question. \
Keep the bracketed citations.";

pub const CHECK_SUFFICIENCY: &str = "Judge whether the answer resolves the question. Reply with \
`Fully Answered`, `Partially Answered` or `Not Answered`.";

pub const GENERATE_PERSONAS: &str = "Propose analyst personas whose perspectives matter for the \
question, each with a short description.";

pub const PERSONA_QUESTIONS: &str = "As this persona, list the questions you would ask the \
filings to answer the main question.";

pub const SUPERVISE_QUESTIONS: &str = "Review the persona questions and add only the questions \
that are missing.";

pub const SUMMARIZE_PERSONAS: &str = "Summarize the persona findings into an answer to the main \
question.";

pub const EXTRACT_KPI_VALUE: &str = "Extract the requested figure from the answer as a plain \
number in the filing's reporting unit. Return null when the answer does not state it.";

pub const FOLLOW_UPS: &str = "Suggest short follow-up questions the user may ask next.";
