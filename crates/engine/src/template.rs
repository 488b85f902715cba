//! Customer-facing delivery message.

/// Public tracking page for an order.
pub fn tracking_url(base_url: &str, command_id: &str) -> String {
    format!("{}/{}/", base_url.trim_end_matches('/'), command_id)
}

/// Render the "delivery in progress" text sent to the customer.
///
/// `display_phone` is the number as the caller submitted it.
pub fn render_delivery_message(display_phone: &str, command_id: &str, base_url: &str) -> String {
    format!(
        "Bonjour {}, votre commande est en cours de livraison. Vous pouvez la suivre ici : {} Merci de faire confiance à Global Express!",
        display_phone,
        tracking_url(base_url, command_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_url_trims_trailing_slash() {
        assert_eq!(
            tracking_url("https://track.example/", "CMD-1"),
            "https://track.example/CMD-1/"
        );
        assert_eq!(
            tracking_url("https://track.example", "CMD-1"),
            "https://track.example/CMD-1/"
        );
    }

    #[test]
    fn test_message_embeds_phone_and_tracking_url() {
        let body = render_delivery_message("+237600000001", "CMD-42", "https://track.example");
        assert!(body.starts_with("Bonjour +237600000001,"));
        assert!(body.contains("https://track.example/CMD-42/"));
        assert!(body.ends_with("Global Express!"));
    }
}
