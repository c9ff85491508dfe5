//! Plain-text dump of a machine after a run.

use std::io::{self, Write};

use streamsheets_core::Machine;

pub(crate) fn write_machine(out: &mut impl Write, machine: &Machine) -> io::Result<()> {
    for streamsheet in machine.streamsheets() {
        writeln!(out, "[{}]", streamsheet.name())?;
        let sheet = streamsheet.sheet();
        for cell_ref in sheet.calculation_order() {
            writeln!(out, "{}: {}", cell_ref, sheet.display_value(&cell_ref))?;
        }
        let stats = streamsheet.stats();
        writeln!(
            out,
            "steps: {}, repeatsteps: {}, inbox: {}",
            stats.steps,
            stats.repeatsteps,
            streamsheet.inbox().size()
        )?;
        writeln!(out)?;
    }

    writeln!(out, "outbox: {}", machine.outbox().size())?;
    for message in machine.outbox().iter() {
        let payload = serde_json::to_string(&message.payload).map_err(io::Error::other)?;
        writeln!(
            out,
            "  {} {}",
            message.metadata.source.as_deref().unwrap_or("-"),
            payload
        )?;
    }
    writeln!(out, "cycle: {}, state: {}", machine.current_cycle(), machine.state())?;
    Ok(())
}
