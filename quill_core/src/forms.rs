//! Typed form inputs and their validation.
//!
//! Validation here is pure: it only looks at the input. Checks that need
//! the store (does the group exist, is the slug taken) happen in the
//! services and report through the same [`FieldError`] list.

use serde::{Deserialize, Serialize};

use crate::{error::FieldError, ids::GroupId};

pub const POST_TEXT_MAX: usize = 10_000;
pub const COMMENT_TEXT_MAX: usize = 2_000;
pub const IMAGE_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const TITLE_MAX: usize = 200;
pub const SLUG_MAX: usize = 200;
pub const USERNAME_MAX: usize = 150;

const REQUIRED: &str = "This field is required.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostInput {
    pub text: String,
    pub group: Option<GroupId>,
    /// New image bytes. `None` keeps whatever the post already has.
    pub image: Option<Vec<u8>>,
    /// Drop the current image. Ignored when `image` is set.
    #[serde(default)]
    pub clear_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    Keep,
    Replace(Vec<u8>),
    Clear,
}

#[derive(Debug, Clone)]
pub struct ValidPost {
    pub text: String,
    pub group: Option<GroupId>,
    pub image: ImageChange,
}

impl PostInput {
    pub fn validate(self) -> Result<ValidPost, Vec<FieldError>> {
        let mut errors = Vec::new();

        let text = required_text("text", &self.text, POST_TEXT_MAX, &mut errors);

        let image = match self.image {
            Some(bytes) => match check_image(&bytes) {
                Ok(()) => ImageChange::Replace(bytes),
                Err(message) => {
                    errors.push(FieldError::new("image", message));
                    ImageChange::Keep
                }
            },
            None if self.clear_image => ImageChange::Clear,
            None => ImageChange::Keep,
        };

        if errors.is_empty() {
            Ok(ValidPost {
                text,
                group: self.group,
                image,
            })
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentInput {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ValidComment {
    pub text: String,
}

impl CommentInput {
    pub fn validate(self) -> Result<ValidComment, Vec<FieldError>> {
        let mut errors = Vec::new();
        let text = required_text("text", &self.text, COMMENT_TEXT_MAX, &mut errors);

        if errors.is_empty() {
            Ok(ValidComment { text })
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupInput {
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ValidGroup {
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl GroupInput {
    pub fn validate(self) -> Result<ValidGroup, Vec<FieldError>> {
        let mut errors = Vec::new();

        let title = required_text("title", &self.title, TITLE_MAX, &mut errors);
        let description = self.description.trim().to_string();
        if description.is_empty() {
            errors.push(FieldError::new("description", REQUIRED));
        }

        let slug = self.slug.trim().to_string();
        if slug.is_empty() {
            errors.push(FieldError::new("slug", REQUIRED));
        } else if slug.chars().count() > SLUG_MAX {
            errors.push(FieldError::new("slug", too_long(SLUG_MAX)));
        } else if !slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            errors.push(FieldError::new(
                "slug",
                "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
            ));
        }

        if errors.is_empty() {
            Ok(ValidGroup {
                title,
                slug,
                description,
            })
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignupInput {
    pub username: String,
}

impl SignupInput {
    pub fn validate(self) -> Result<String, Vec<FieldError>> {
        let username = self.username.trim().to_string();

        let message = if username.is_empty() {
            Some(REQUIRED.to_string())
        } else if username.chars().count() > USERNAME_MAX {
            Some(too_long(USERNAME_MAX))
        } else if !username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        {
            Some(
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                    .to_string(),
            )
        } else {
            None
        };

        match message {
            Some(message) => Err(vec![FieldError::new("username", message)]),
            None => Ok(username),
        }
    }
}

fn required_text(field: &str, raw: &str, max: usize, errors: &mut Vec<FieldError>) -> String {
    let text = raw.trim();
    if text.is_empty() {
        errors.push(FieldError::new(field, REQUIRED));
    } else if text.chars().count() > max {
        errors.push(FieldError::new(field, too_long(max)));
    }
    text.to_string()
}

fn too_long(max: usize) -> String {
    format!("Ensure this value has at most {max} characters.")
}

fn check_image(bytes: &[u8]) -> Result<(), &'static str> {
    const SIGNATURES: &[&[u8]] = &[
        b"\x89PNG\r\n\x1a\n",
        b"\xff\xd8\xff",
        b"GIF87a",
        b"GIF89a",
    ];

    if bytes.is_empty() {
        return Err("The submitted file is empty.");
    }
    if bytes.len() > IMAGE_MAX_BYTES {
        return Err("The submitted file is too large.");
    }

    let is_webp = bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP";
    if is_webp || SIGNATURES.iter().any(|sig| bytes.starts_with(sig)) {
        Ok(())
    } else {
        Err("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    #[test]
    fn post_text_is_trimmed_and_required() {
        let valid = PostInput {
            text: "  hello  ".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(valid.text, "hello");
        assert_eq!(valid.image, ImageChange::Keep);

        let errors = PostInput {
            text: "   ".into(),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors, vec![FieldError::new("text", REQUIRED)]);
    }

    #[test]
    fn post_image_must_look_like_an_image() {
        let valid = PostInput {
            text: "pic".into(),
            image: Some(GIF.to_vec()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(valid.image, ImageChange::Replace(GIF.to_vec()));

        let errors = PostInput {
            text: "".into(),
            image: Some(b"not an image".to_vec()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["text", "image"]);
    }

    #[test]
    fn clear_image_only_applies_without_new_image() {
        let cleared = PostInput {
            text: "t".into(),
            clear_image: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cleared.image, ImageChange::Clear);

        let replaced = PostInput {
            text: "t".into(),
            image: Some(GIF.to_vec()),
            clear_image: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert!(matches!(replaced.image, ImageChange::Replace(_)));
    }

    #[test]
    fn comment_text_length_is_bounded() {
        let errors = CommentInput {
            text: "x".repeat(COMMENT_TEXT_MAX + 1),
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors[0].message, too_long(COMMENT_TEXT_MAX));
    }

    #[test]
    fn group_slug_rejects_spaces() {
        let errors = GroupInput {
            title: "Cats".into(),
            slug: "cat pictures".into(),
            description: "All about cats".into(),
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "slug");
    }

    #[test]
    fn username_charset() {
        assert_eq!(
            SignupInput {
                username: " leo.t+1 ".into()
            }
            .validate()
            .unwrap(),
            "leo.t+1"
        );
        assert!(SignupInput {
            username: "no spaces".into()
        }
        .validate()
        .is_err());
    }
}
