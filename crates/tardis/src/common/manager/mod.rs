pub mod htcondor;
