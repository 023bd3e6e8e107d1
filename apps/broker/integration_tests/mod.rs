mod logger;
mod shutdown;
