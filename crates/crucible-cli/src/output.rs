use serde_json::Value;

/// Render an evaluation record as human-readable text.
pub fn render_evaluation(v: &Value) -> String {
    let id = v.get("id").and_then(Value::as_str).unwrap_or("-");
    let status = v.get("status").and_then(Value::as_str).unwrap_or("-");
    let language = v.get("language").and_then(Value::as_str).unwrap_or("-");
    let exit_code = v.get("exit_code").and_then(Value::as_i64).unwrap_or(-1);

    let mut out = format!("Evaluation: {id}\nStatus:     {status}\nLanguage:   {language}\nExit code:  {exit_code}\n");
    if let Some(cause) = v.get("cause").filter(|c| !c.is_null()) {
        out.push_str(&format!("Cause:      {cause}\n"));
    }
    out
}

/// Render a pool snapshot as human-readable text.
pub fn render_pool(v: &Value) -> String {
    let Some(slots) = v.get("slots").and_then(Value::as_array) else {
        return "No slots.".to_string();
    };
    if slots.is_empty() {
        return "No slots.".to_string();
    }
    let mut out = String::new();
    for slot in slots {
        let id = slot.get("slot").and_then(Value::as_u64).unwrap_or(0);
        let held_by = slot.get("held_by").and_then(Value::as_str);
        match held_by {
            Some(holder) => out.push_str(&format!("slot {id}: held by {holder}\n")),
            None => out.push_str(&format!("slot {id}: free\n")),
        }
    }
    out
}

/// Render a queue depth snapshot as human-readable text.
pub fn render_queue(v: &Value) -> String {
    let high = v.get("high").and_then(Value::as_u64).unwrap_or(0);
    let normal = v.get("normal").and_then(Value::as_u64).unwrap_or(0);
    let in_flight = v.get("in_flight").and_then(Value::as_u64).unwrap_or(0);
    format!("high: {high}  normal: {normal}  in_flight: {in_flight}\n")
}
