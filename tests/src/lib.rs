#[cfg(test)]
mod fakes;
mod measurement;
mod trace;
