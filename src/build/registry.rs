use super::{
    recipes::{BusyBox, CrossLlvm, LibFuse, LinuxHeaders, Musl, Pcre2, Xz, ZlibNg, Zstd},
    PhasedRecipe, Standard,
};

/// Every package the orchestrator knows how to build, in bootstrap order.
pub fn catalog() -> Vec<Box<dyn PhasedRecipe>> {
    vec![
        Box::new(CrossLlvm),
        Box::new(LinuxHeaders),
        Box::new(Musl),
        Box::new(Standard(ZlibNg)),
        Box::new(Standard(Zstd)),
        Box::new(Xz),
        Box::new(Standard(Pcre2)),
        Box::new(Standard(LibFuse)),
        Box::new(Standard(BusyBox)),
    ]
}

pub fn find(name: &str) -> Option<Box<dyn PhasedRecipe>> {
    catalog().into_iter().find(|recipe| recipe.name() == name)
}

pub fn names() -> Vec<String> {
    catalog()
        .iter()
        .map(|recipe| recipe.name().to_string())
        .collect()
}
