//! Display-name masking for list views and notifications.

/// Keep the first two characters of each space-separated token and replace
/// the rest with one `*` per character. Tokens of two characters or fewer are
/// left as they are.
pub fn mask_name(full_name: &str) -> String {
    full_name.split(' ').map(mask_token).collect::<Vec<_>>().join(" ")
}

fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= 2 {
        return token.to_string();
    }
    token
        .chars()
        .take(2)
        .chain(std::iter::repeat_n('*', len - 2))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_each_token() {
        assert_eq!(mask_name("Joao Silva"), "Jo** Si***");
    }

    #[test]
    fn test_short_tokens_unmasked() {
        assert_eq!(mask_name("Li Wu"), "Li Wu");
        assert_eq!(mask_name("Ana de Souza"), "An* de So***");
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        assert_eq!(mask_name("João Conceição"), "Jo** Co*******");
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(mask_name(""), "");
    }

    #[test]
    fn test_masked_differs_and_keeps_prefixes() {
        let names = [
            "Maria Aparecida",
            "Joao Pedro Oliveira",
            "Francisca Conceicao",
            "Ant Bee Cat",
        ];
        for name in names {
            let masked = mask_name(name);
            assert_ne!(masked, name);
            assert_eq!(masked.chars().count(), name.chars().count());
            for (original, token) in name.split(' ').zip(masked.split(' ')) {
                let head: String = original.chars().take(2).collect();
                assert!(token.starts_with(&head), "{token} should start with {head}");
                assert!(token.chars().skip(2).all(|c| c == '*'));
            }
        }
    }
}
