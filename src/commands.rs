//! Symbolic control ids to wire commands
//!
//! Pure translation layer: a control id coming from a caller (plus an
//! optional numeric argument) becomes the exact ASCII command sent over
//! the command channel, e.g. `"forward 50"` or `"cw 90"`. Unknown ids
//! translate to `None`; nothing here is fatal.

/// Default distance argument for movement commands (cm)
pub const DEFAULT_DISTANCE: i64 = 20;

/// Default angle argument for rotation commands (deg)
pub const DEFAULT_ANGLE: i64 = 90;

/// Translate a symbolic control id into a wire command.
///
/// Exact matches (including common aliases) win over fuzzy stem
/// matching. Movement commands carry a distance argument (`value` or
/// [`DEFAULT_DISTANCE`]), rotations an angle argument (`value` or
/// [`DEFAULT_ANGLE`]).
pub fn translate(control_id: &str, value: Option<i64>) -> Option<String> {
    let id = control_id.trim().to_ascii_lowercase();
    if id.is_empty() {
        return None;
    }
    if let Some(base) = exact_base(&id) {
        return Some(with_argument(base, value));
    }
    fuzzy_match(&id, value)
}

/// Canonical ids and their aliases
fn exact_base(id: &str) -> Option<&'static str> {
    Some(match id {
        "takeoff" | "start" => "takeoff",
        "land" | "stop" => "land",
        "forward" => "forward",
        "back" | "reverse" => "back",
        "left" => "left",
        "right" => "right",
        "up" => "up",
        "down" | "descend" | "lower" => "down",
        "rotate_cw" | "turnright" | "turn_right" => "cw",
        "rotate_ccw" | "turnleft" | "turn_left" => "ccw",
        "flip_left" => "flip l",
        "flip_right" => "flip r",
        "flip_forward" => "flip f",
        "flip_back" => "flip b",
        "emergency" => "emergency",
        "streamon" => "streamon",
        "streamoff" => "streamoff",
        _ => return None,
    })
}

/// Append the numeric argument where the base command takes one
fn with_argument(base: &str, value: Option<i64>) -> String {
    match base {
        "forward" | "back" | "left" | "right" | "up" | "down" => {
            format!("{} {}", base, value.unwrap_or(DEFAULT_DISTANCE))
        }
        "cw" | "ccw" => format!("{} {}", base, value.unwrap_or(DEFAULT_ANGLE)),
        _ => base.to_string(),
    }
}

/// Fuzzy substring matching against keyword stems.
///
/// Ids matching several stems resolve by listed priority: movement, then
/// rotation, then flip, then emergency, then stream. This makes e.g.
/// `"rotate_right"` translate as a rightward move; a known ambiguity of
/// the lenient matcher, documented rather than special-cased.
fn fuzzy_match(id: &str, value: Option<i64>) -> Option<String> {
    const MOVEMENT_STEMS: [(&str, &[&str]); 6] = [
        ("forward", &["forward", "fwd"]),
        ("back", &["back", "reverse"]),
        ("left", &["left"]),
        ("right", &["right"]),
        ("up", &["up", "lift"]),
        ("down", &["down", "lower"]),
    ];

    for (base, stems) in MOVEMENT_STEMS {
        if stems.iter().any(|stem| id.contains(stem)) {
            return Some(with_argument(base, value));
        }
    }

    if id.contains("rotate") || id.contains("turn") {
        // ccw stems first: "ccw" and "counterclockwise" contain the cw stems
        if id.contains("ccw") || id.contains("counter") {
            return Some(with_argument("ccw", value));
        }
        if id.contains("cw") || id.contains("clockwise") {
            return Some(with_argument("cw", value));
        }
    }

    if id.contains("flip") {
        // direction words would have hit the movement table above; what is
        // left are compact forms like "flip_l" or "flipb"
        return match id.trim_end_matches('_').chars().last()? {
            'l' => Some("flip l".to_string()),
            'r' => Some("flip r".to_string()),
            'f' => Some("flip f".to_string()),
            'b' => Some("flip b".to_string()),
            _ => None,
        };
    }

    if id.contains("emergency") {
        return Some("emergency".to_string());
    }

    if id.contains("stream") {
        if id.contains("off") {
            return Some("streamoff".to_string());
        }
        if id.contains("on") {
            return Some("streamon".to_string());
        }
    }

    None
}
