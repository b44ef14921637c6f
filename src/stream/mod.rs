pub mod guard;
pub mod sse;
pub mod translator;

pub use guard::GuardedTurn;
pub use sse::{encode_chatkit_event, is_done_event, sse_frame_stream, SseEvent, SseParser};
pub use translator::{translate, translate_turn, TranslatorContext, TurnTranslator};
