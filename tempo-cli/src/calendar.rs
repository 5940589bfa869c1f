use tempo_core::FocusBlock;

/// Emit an ICS calendar with one VEVENT per focus block.
///
/// DTSTART/DTEND are UTC. UIDs derive from block ids, so re-importing the same
/// export updates events instead of duplicating them.
pub fn blocks_to_ics(blocks: &[FocusBlock], title_prefix: &str) -> String {
    let mut s = String::new();
    s.push_str("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Tempo//EN\r\n");

    for b in blocks {
        let dtstart = b.start_time.format("%Y%m%dT%H%M%SZ");
        let dtend = b.end_time.format("%Y%m%dT%H%M%SZ");

        s.push_str("BEGIN:VEVENT\r\n");
        s.push_str(&format!("UID:{}@tempo\r\n", b.id));
        s.push_str(&format!("DTSTART:{dtstart}\r\n"));
        s.push_str(&format!("DTEND:{dtend}\r\n"));
        s.push_str(&format!("SUMMARY:{}\r\n", escape_ics(&format!("{title_prefix}{}", b.title))));
        s.push_str(&format!("DESCRIPTION:{}\r\n", escape_ics(&describe(b))));
        if b.completed {
            s.push_str("STATUS:CONFIRMED\r\n");
        }
        s.push_str("END:VEVENT\r\n");
    }

    s.push_str("END:VCALENDAR\r\n");
    s
}

fn describe(b: &FocusBlock) -> String {
    let mut d = String::new();
    if let Some(task_id) = &b.metadata.task_id {
        d.push_str(&format!("TaskId: {task_id}\n"));
    }
    if !b.context.is_empty() {
        d.push_str(&format!("Context: {}\n", b.context));
    }
    d.push_str(&format!("Timezone: {}\n", b.timezone));
    d
}

fn escape_ics(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}
