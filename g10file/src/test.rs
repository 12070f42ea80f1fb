mod object;
mod program;
