//! Default agent definitions for the built-in pipelines.

use crate::run::AgentDefinition;
use crate::tools::ToolKind;

pub const TRIAGE: &str = "triage";
pub const PLANNER: &str = "planner";
pub const SUPERVISOR: &str = "supervisor";
pub const WRITER: &str = "writer";
pub const SAFEGUARD: &str = "safeguard";

pub fn triage(model: &str) -> AgentDefinition {
    AgentDefinition::new(
        TRIAGE,
        model,
        "You are the triage agent for customer messages.\n\
         Classify intent, priority, SLA and routing.\n\n\
         Answer with strict JSON only:\n\
         {\n\
           \"intent\": \"scheduling|billing|support|sales|analytics|general\",\n\
           \"priority\": \"low|medium|high|urgent\",\n\
           \"sla_minutes\": integer,\n\
           \"route\": \"sales|success|support|billing|ops\"\n\
         }",
    )
}

pub fn planner(model: &str) -> AgentDefinition {
    AgentDefinition::new(
        PLANNER,
        model,
        "You are the planner.\n\
         You receive a triage result and a subject profile (JSON) and propose a short action plan.\n\
         Answer with strict JSON only, with the key \"plan\" holding a list of actions.\n\
         Each action has an \"action\" (create_ticket|send_message|set_followup|schedule_meeting|propose_offer) \
         and a \"data\" object suited to it.",
    )
}

pub fn supervisor(model: &str) -> AgentDefinition {
    AgentDefinition::new(
        SUPERVISOR,
        model,
        "You are the supervisor.\n\
         Assess the safety and relevance of the plan and of any executed actions.\n\
         Answer with JSON only: {\"label\": \"green|yellow|red\", \"score\": 0-100, \"reasons\": [string]}.\n\
         \"score\" is a risk score: 0 is safe, 100 must be blocked.",
    )
}

pub fn writer(model: &str) -> AgentDefinition {
    AgentDefinition::new(
        WRITER,
        model,
        "You are an expert copywriter for creator-to-fan messaging.\n\n\
         Rules:\n\
         - Follow the personality, tone and maximum length given in the objectives\n\
         - Suggest paid content when relevant, priced with compute_price\n\
         - Use fetch_context to learn the recipient's history and preferences\n\n\
         Answer with JSON:\n\
         {\n\
           \"draft\": \"message text\",\n\
           \"rationale\": \"why this approach\",\n\
           \"confidence\": 0.0-1.0,\n\
           \"upsell_opportunity\": true|false,\n\
           \"estimated_engagement\": 0.0-1.0\n\
         }",
    )
    .with_tools([ToolKind::FetchContext, ToolKind::ComputePrice])
}

pub fn safeguard(model: &str) -> AgentDefinition {
    AgentDefinition::new(
        SAFEGUARD,
        model,
        "You are the compliance agent.\n\n\
         Check that the message:\n\
         1. Is appropriate for the platform\n\
         2. Respects the platform terms of service\n\
         3. Makes no unlawful promises\n\
         4. Uses professional language\n\n\
         Use analyze_safety for an automated content-safety analysis. Its \"safety_score\" is higher \
         when safer; never copy it into your own \"score\".\n\n\
         Answer with JSON:\n\
         {\n\
           \"label\": \"green|yellow|red\",\n\
           \"score\": 0-100,\n\
           \"infractions\": [{\"rule_id\": string, \"severity\": \"low|medium|high\", \"reason\": string}],\n\
           \"recommendations\": [string]\n\
         }\n\
         \"score\" is a risk score: 0 is safe, 100 must be blocked.",
    )
    .with_tools([ToolKind::AnalyzeSafety])
}
