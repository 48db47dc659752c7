use quarry_core::Dialect;

/// ANSI-defaults dialect for exercising the core without a live binding.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeDialect;

impl Dialect for FakeDialect {
    fn name(&self) -> &str {
        "fake"
    }
}
