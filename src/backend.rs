//! Contract with the generative-image collaborator.
//!
//! The crate ships no implementation; callers plug in their own backend and
//! use [`resolve_prompt_text`] to turn a chosen transformation into the text
//! they send.

use async_trait::async_trait;

use crate::error::{EffectError, Result};
use crate::merge::MergedPromptItem;

/// One input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The backend's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Any text the backend returned alongside the image.
    pub text: Option<String>,
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn apply_transformation(
        &self,
        images: &[ImageInput],
        prompt: &str,
    ) -> Result<GeneratedImage>;
}

/// The prompt to send for `item`: its own text, or `free_text` when the item
/// is the free-form entry.
pub fn resolve_prompt_text(item: &MergedPromptItem, free_text: Option<&str>) -> Result<String> {
    let text = if item.is_free_form() {
        free_text.map(str::trim).unwrap_or("")
    } else {
        item.prompt.trim()
    };
    if text.is_empty() {
        return Err(EffectError::validation("prompt", "Prompt is required"));
    }
    Ok(text.to_string())
}

/// Resolve the prompt for `item` and hand it to `backend` with `images`.
pub async fn apply<B: ImageBackend + ?Sized>(
    backend: &B,
    images: &[ImageInput],
    item: &MergedPromptItem,
    free_text: Option<&str>,
) -> Result<GeneratedImage> {
    if images.is_empty() {
        return Err(EffectError::validation("images", "At least one image is required"));
    }
    let prompt = resolve_prompt_text(item, free_text)?;
    backend.apply_transformation(images, &prompt).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CUSTOM_PROMPT_KEY, CUSTOM_SENTINEL};
    use std::sync::Mutex;

    fn item(key: &str, prompt: &str) -> MergedPromptItem {
        MergedPromptItem {
            key: key.to_string(),
            title: key.to_string(),
            prompt: prompt.to_string(),
            icon: None,
            category: None,
            is_builtin: true,
            is_overridden: false,
            is_patched: false,
            is_hidden: false,
        }
    }

    #[test]
    fn test_fixed_prompt_ignores_free_text() {
        let watercolor = item("watercolor", "Paint it ");
        assert_eq!(
            resolve_prompt_text(&watercolor, Some("ignored")).unwrap(),
            "Paint it"
        );
    }

    #[test]
    fn test_free_form_uses_user_text() {
        let custom = item(CUSTOM_PROMPT_KEY, CUSTOM_SENTINEL);
        assert_eq!(
            resolve_prompt_text(&custom, Some("  make it pink ")).unwrap(),
            "make it pink"
        );
        assert!(resolve_prompt_text(&custom, Some("   ")).is_err());
        assert!(resolve_prompt_text(&custom, None).is_err());
    }

    #[test]
    fn test_empty_fixed_prompt_is_rejected() {
        assert!(resolve_prompt_text(&item("bare", ""), None).is_err());
    }

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl ImageBackend for Recorder {
        async fn apply_transformation(
            &self,
            images: &[ImageInput],
            prompt: &str,
        ) -> Result<GeneratedImage> {
            self.0.lock().unwrap().push(prompt.to_string());
            Ok(GeneratedImage {
                bytes: images[0].bytes.clone(),
                mime_type: images[0].mime_type.clone(),
                text: None,
            })
        }
    }

    #[tokio::test]
    async fn test_apply_sends_resolved_prompt() {
        let backend = Recorder(Mutex::new(Vec::new()));
        let images = [ImageInput {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".into(),
        }];
        let out = apply(&backend, &images, &item(CUSTOM_PROMPT_KEY, CUSTOM_SENTINEL), Some("blue"))
            .await
            .unwrap();
        assert_eq!(out.bytes, vec![1, 2, 3]);
        assert_eq!(*backend.0.lock().unwrap(), vec!["blue".to_string()]);

        let err = apply(&backend, &[], &item("a", "b"), None).await.unwrap_err();
        assert!(matches!(err, EffectError::Validation { .. }));
    }
}
