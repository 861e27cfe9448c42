use std::sync::Arc;

use vane_core::Sanitizer;

/// Renders markup as literal text by escaping every special character.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscapingSanitizer;

impl Sanitizer for EscapingSanitizer {
    fn sanitize(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        for ch in html.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                other => out.push(other),
            }
        }
        out
    }
}

/// Whitelist sanitizer keeping formatting markup and dropping scripts,
/// event-handler attributes and `javascript:` links.
#[cfg(feature = "ammonia")]
#[derive(Debug, Default, Clone, Copy)]
pub struct AmmoniaSanitizer;

#[cfg(feature = "ammonia")]
impl Sanitizer for AmmoniaSanitizer {
    fn sanitize(&self, html: &str) -> String {
        ammonia::clean(html)
    }
}

/// Best sanitizer compiled into this build.
pub fn platform_sanitizer() -> Arc<dyn Sanitizer> {
    #[cfg(feature = "ammonia")]
    {
        Arc::new(AmmoniaSanitizer)
    }
    #[cfg(not(feature = "ammonia"))]
    {
        Arc::new(EscapingSanitizer)
    }
}
