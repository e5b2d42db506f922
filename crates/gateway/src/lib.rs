//! Provider registry, ensemble debate engine and OpenAI-compatible request
//! pipeline. The public surface an embedding HTTP service needs: register
//! providers, run a chat/completions request through the pipeline, and read
//! back an `LLMResponse`/`ResponseChunk` stream.

pub mod chat;
pub mod debate;
pub mod dialogue;
pub mod ensemble;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod scores;
pub mod toolcalls;

pub use chat::{
    ChatMessage, ChatRole, FinishReason, FunctionCall, FunctionTool, LLMResponse, ParameterProperty,
    ResponseChunk, Tool, ToolCall, ToolChoice, Usage,
};
pub use debate::{DebateEngine, DebateSession, DebateTeamConfig, DebateTeamMember, Position};
pub use ensemble::{EnsembleConfig, EnsembleResult, EnsembleService, ProviderOutcome, VotingMethod};
pub use error::GatewayError;
pub use params::LLMParams;
pub use pipeline::{PipelineResult, RequestPipeline};
pub use registry::{
    CredentialKind, LLMRequest, Provider, ProviderRegistry, Score, ScoreComponents, ScoreSource,
    ScoreWeights,
};
pub use scores::ScoreStore;
