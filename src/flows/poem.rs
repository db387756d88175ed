//! `poem_flow`: the model picks an unusual theme, then writes a short poem
//! about it. Takes no inputs.

use serde_json::json;

use crate::flows::chain::{text_of, Chain, Step};
use crate::flows::Pipeline;
use crate::llm::LlmHandle;
use crate::types::AppResult;

const THEME_PROMPT: &str = "Suggest an interesting and unusual theme for a poem.";
const POEM_PROMPT: &str = "Write a short poem about the following theme: {theme}";

pub fn create_poem_flow(llm: LlmHandle) -> AppResult<Box<dyn Pipeline>> {
    let chain = Chain::new()
        .named("Poem Creation Flow")
        .then(Step::prompt(THEME_PROMPT).named("Generating Theme Prompt"))
        .then(Step::model(llm.clone()).named("LLM Suggesting Theme"))
        .then(Step::map(|reply| Ok(json!(text_of(&reply)))).named("Extracting Theme Content"))
        .then(Step::map(|theme| Ok(json!({ "theme": theme }))).named("Preparing Poem Input"))
        .then(Step::prompt(POEM_PROMPT).named("Generating Poem Prompt"))
        .then(Step::model(llm).named("LLM Writing Poem"));

    Ok(Box::new(chain))
}
