use crate::job::Job;

pub(super) enum Command<H> {
    Run(Job<H>),
    Shutdown,
}
