use std::fmt::Display;

#[cfg(not(target_arch = "wasm32"))]
pub fn show_error_popup(title: &str, message: &str) {
    use native_dialog::{DialogBuilder, MessageLevel};

    if let Err(e) = DialogBuilder::message()
        .set_level(MessageLevel::Error)
        .set_title(title)
        .set_text(message)
        .alert()
        .show()
    {
        tracing::warn!("Failed to show error dialog: {}", e);
    }
}

#[cfg(target_arch = "wasm32")]
pub fn show_error_popup(_title: &str, _message: &str) {}

/// Reports an unrecoverable setup error to the user and aborts the current thread.
pub fn show_error_popup_and_panic<E: Display>(error: E, context: &str) -> ! {
    let message = format_fatal_error(&error, context);
    tracing::error!("{}", message);
    show_error_popup(context, &error.to_string());
    panic!("{}", message);
}

fn format_fatal_error<E: Display>(error: &E, context: &str) -> String {
    format!("{}: {}", context, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_message_prefixes_context() {
        let message = format_fatal_error(&"no suitable GPU", "Failed to create graphics context");
        assert_eq!(
            message,
            "Failed to create graphics context: no suitable GPU"
        );
    }
}
