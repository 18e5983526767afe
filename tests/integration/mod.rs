mod support;

mod resume_flow;
mod review_flow;
mod run_flow;
