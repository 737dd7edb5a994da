use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Fetched, Extracted, Summarized, Chunked, Persisted, Failed],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        extract { transition: { from: Fetched, to: Extracted } }
        summarize { transition: { from: Extracted, to: Summarized } }
        chunk { transition: { from: Summarized, to: Chunked } }
        persist { transition: { from: Chunked, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Fetched, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Summarized, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
