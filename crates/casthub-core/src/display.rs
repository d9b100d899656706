//! Countdown display formatting.
//!
//! Timers publish a human-readable line per tick alongside the wire packet,
//! intended for file-backed overlays. The line for the final tick is a
//! single blank, which clears the overlay instead of leaving a stale "0:00".

/// The line written once a countdown has finished.
pub const CLEARED_DISPLAY: &str = " ";

/// Formats a second count as `M:SS`.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Renders one countdown overlay line.
///
/// `remaining` below zero means the countdown is over and the display
/// should be cleared.
pub fn render_timer_line(message: &str, remaining: i64) -> String {
    if remaining < 0 {
        CLEARED_DISPLAY.to_string()
    } else {
        format!("{} {}", message, format_countdown(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "0:00");
        assert_eq!(format_countdown(9), "0:09");
        assert_eq!(format_countdown(60), "1:00");
        assert_eq!(format_countdown(599), "9:59");
        assert_eq!(format_countdown(600), "10:00");
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        assert_eq!(format_countdown(-5), "0:00");
    }

    #[test]
    fn test_render_timer_line() {
        assert_eq!(render_timer_line("Starting in", 125), "Starting in 2:05");
        assert_eq!(render_timer_line("Starting in", 0), "Starting in 0:00");
    }

    #[test]
    fn test_finished_countdown_clears_display() {
        assert_eq!(render_timer_line("Starting in", -1), CLEARED_DISPLAY);
    }
}
