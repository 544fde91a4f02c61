use state_machines::state_machine;

state_machine! {
    name: QuestionMachine,
    state: QuestionState,
    initial: Pending,
    states: [Pending, ContextSelected, Requesting, Retrying, Answered, Failed, Cancelled],
    events {
        select { transition: { from: Pending, to: ContextSelected } }
        hit { transition: { from: ContextSelected, to: Answered } }
        request { transition: { from: ContextSelected, to: Requesting } }
        retry { transition: { from: Requesting, to: Retrying } }
        resolve {
            transition: { from: Requesting, to: Answered }
            transition: { from: Retrying, to: Answered }
        }
        fail {
            transition: { from: Requesting, to: Failed }
            transition: { from: Retrying, to: Failed }
        }
        cancel {
            transition: { from: Pending, to: Cancelled }
            transition: { from: ContextSelected, to: Cancelled }
            transition: { from: Requesting, to: Cancelled }
            transition: { from: Retrying, to: Cancelled }
        }
    }
}

pub fn pending() -> QuestionMachine<(), Pending> {
    QuestionMachine::new(())
}
