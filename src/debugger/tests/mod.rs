//! Debugger 单元测试
