pub mod compile;
pub mod dump;
pub mod repl;
pub mod run;

use lit_engine::compiler::optimizer::OptimizationLevel;

/// Parse an `-O` argument. Unknown names fall back to the default level.
pub fn parse_optimization_level(name: &str) -> Option<OptimizationLevel> {
    match name {
        "none" => Some(OptimizationLevel::None),
        "repl" => Some(OptimizationLevel::Repl),
        "debug" => Some(OptimizationLevel::Debug),
        "release" => Some(OptimizationLevel::Release),
        "extreme" => Some(OptimizationLevel::Extreme),
        _ => None,
    }
}
