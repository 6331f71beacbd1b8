//! Job details: the comparable descriptor of what a job executes.
//!
//! Two jobs with equal `JobDetails` run the same method with the same
//! arguments. Equality is structural, which is what recurring-job dedupe
//! relies on when asking storage whether an instance already exists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One argument of a job invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobParameter {
    /// Type name of the argument.
    pub class_name: String,
    /// Serialized argument value.
    pub value: String,
}

impl JobParameter {
    /// Create a new parameter.
    pub fn new(class_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            value: value.into(),
        }
    }
}

/// Descriptor of the method a job invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDetails {
    class_name: String,
    method_name: String,
    #[serde(default)]
    parameters: Vec<JobParameter>,
}

impl JobDetails {
    /// Create details for a method without arguments.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            parameters: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn with_parameter(
        mut self,
        class_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.parameters.push(JobParameter::new(class_name, value));
        self
    }

    /// Replace all arguments.
    pub fn with_parameters(mut self, parameters: Vec<JobParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parameters(&self) -> &[JobParameter] {
        &self.parameters
    }
}

impl fmt::Display for JobDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.class_name, self.method_name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.value)?;
        }
        write!(f, ")")
    }
}
