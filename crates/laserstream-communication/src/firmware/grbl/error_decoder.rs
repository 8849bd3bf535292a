//! GRBL error and alarm code descriptions
//!
//! Only used to make `error:N` / `ALARM:N` log lines readable.

/// Short description of a GRBL `error:N` code
pub fn describe_error(code: u8) -> &'static str {
    match code {
        1 => "expected command letter",
        2 => "bad number format",
        3 => "invalid '$' statement",
        4 => "negative value",
        5 => "homing not enabled",
        8 => "'$' command requires idle state",
        9 => "locked out during alarm or jog",
        10 => "soft limits need homing enabled",
        11 => "line overflow",
        13 => "safety door open",
        15 => "jog target exceeds travel",
        16 => "invalid jog command",
        17 => "laser mode requires PWM output",
        20 => "unsupported command",
        21 => "modal group violation",
        22 => "undefined feed rate",
        23 => "command requires integer value",
        24 => "axis words used by two commands",
        25 => "repeated word",
        26 => "no axis words",
        27 => "invalid line number",
        28 => "missing value word",
        33 => "invalid motion target",
        36 => "unused words in block",
        _ => "unknown error",
    }
}

/// Short description of a GRBL `ALARM:N` code
pub fn describe_alarm(code: u8) -> &'static str {
    match code {
        1 => "hard limit triggered",
        2 => "soft limit exceeded",
        3 => "reset while in motion",
        4 => "probe fail: not in expected initial state",
        5 => "probe fail: no contact",
        6 => "homing fail: reset during cycle",
        7 => "homing fail: safety door opened",
        8 => "homing fail: pull-off did not clear switch",
        9 => "homing fail: switch not found",
        _ => "unknown alarm",
    }
}
