mod streaming_text;
mod native_tool_call;
mod dialect_fallback;
mod slow_backend;
mod cancellation;
mod cache_single_flight;
