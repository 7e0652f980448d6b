pub mod cand;
pub mod config;
pub mod decoder;
pub mod lm;
pub mod models;
pub mod ruletable;
pub mod vocab;

pub use cand::{Cand, CandBeam, RuleInst, Span};
pub use config::{DecoderParams, FeatureWeight, Settings};
pub use decoder::{SentenceDecoder, TuneInfo};
pub use lm::LanguageModel;
pub use models::{ModelPaths, Models};
pub use ruletable::{RuleTable, RuleType, TargetRule};
pub use vocab::{FunctionWordSet, Vocab};
